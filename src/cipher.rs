//! Field Cipher
//!
//! Obscures one text attribute per entity before it reaches a heap file.
//! The cipher is handed to the store when it is opened; there is no global
//! key state.
//!
//! ## Key Ring File
//! ```text
//! keys/field.key   one line, 64 hex chars (32 key bytes)
//! ```
//! The key ring is generated once and reloaded on every later open.

use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::error::{Result, VaultError};

/// Key material length in bytes
pub const KEY_LEN: usize = 32;

/// Reversible text transform applied to a single field
pub trait FieldCipher {
    /// Short identifier, shown by `stats`
    fn name(&self) -> &'static str;

    fn encrypt(&self, plain: &str) -> Result<String>;

    fn decrypt(&self, cipher: &str) -> Result<String>;
}

/// Leaves text untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCipher;

impl PlainCipher {
    pub const NAME: &'static str = "plain";
}

impl FieldCipher for PlainCipher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encrypt(&self, plain: &str) -> Result<String> {
        Ok(plain.to_string())
    }

    fn decrypt(&self, cipher: &str) -> Result<String> {
        Ok(cipher.to_string())
    }
}

/// Key material owned by one store
#[derive(Clone)]
pub struct KeyRing {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing").finish_non_exhaustive()
    }
}

impl KeyRing {
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Fresh random key from two v4 UUIDs
    ///
    /// Each UUID fixes 6 version and variant bits, so the key carries 244
    /// random bits out of 256.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        key[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        key[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        Self { key }
    }

    /// Load the key at `path`, or generate and save one if there is none
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let ring = Self::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", hex::encode(ring.key)))?;
        tracing::info!("Generated field cipher key at {}", path.display());
        Ok(ring)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let bytes = hex::decode(text.trim())
            .map_err(|e| VaultError::Cipher(format!("key file {} is not hex: {}", path.display(), e)))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            VaultError::Cipher(format!(
                "key file {} holds {} bytes, expected {}",
                path.display(),
                bytes.len(),
                KEY_LEN
            ))
        })?;
        Ok(Self { key })
    }

    fn byte(&self, pos: usize) -> u8 {
        // Position-dependent so repeated characters do not repeat in the output
        self.key[pos % KEY_LEN] ^ (pos as u8).wrapping_mul(31)
    }
}

/// Keyed XOR stream rendered as lowercase hex
#[derive(Debug, Clone)]
pub struct XorHexCipher {
    ring: KeyRing,
}

impl XorHexCipher {
    pub const NAME: &'static str = "xor-hex";

    pub fn new(ring: KeyRing) -> Self {
        Self { ring }
    }

    fn apply(&self, bytes: &mut [u8]) {
        for (pos, b) in bytes.iter_mut().enumerate() {
            *b ^= self.ring.byte(pos);
        }
    }
}

impl FieldCipher for XorHexCipher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encrypt(&self, plain: &str) -> Result<String> {
        let mut bytes = plain.as_bytes().to_vec();
        self.apply(&mut bytes);
        Ok(hex::encode(bytes))
    }

    fn decrypt(&self, cipher: &str) -> Result<String> {
        let mut bytes =
            hex::decode(cipher).map_err(|e| VaultError::Cipher(format!("ciphertext is not hex: {}", e)))?;
        self.apply(&mut bytes);
        String::from_utf8(bytes).map_err(|e| VaultError::Cipher(format!("deciphered text is not UTF-8: {}", e)))
    }
}
