//! Whole-directory packing
//!
//! Applies a [`FileCodec`] to every file of a closed data directory, writing
//! the results to a second directory together with a manifest. The store
//! never sees packed files; unpack before opening.
//!
//! ## Manifest (`MANIFEST`, text)
//! ```text
//! codec identity
//! file 1a2b3c4d 4096 customers/customers.db
//! file 00ff00ff 120 customers/customers.idx
//! ```
//! Each `file` line carries the crc32 and length of the original bytes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};

pub const MANIFEST_NAME: &str = "MANIFEST";

/// Byte-buffer transform with a symmetric inverse
pub trait FileCodec {
    /// Recorded in the manifest and checked on unpack
    fn name(&self) -> &'static str;

    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>>;

    fn decode(&self, packed: &[u8]) -> Result<Vec<u8>>;
}

/// Copies bytes unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl FileCodec for IdentityCodec {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decode(&self, packed: &[u8]) -> Result<Vec<u8>> {
        Ok(packed.to_vec())
    }
}

/// Sizes before and after a pack or unpack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub files: usize,
    pub original_bytes: u64,
    pub packed_bytes: u64,
}

#[derive(Debug)]
struct ManifestEntry {
    crc: u32,
    len: u64,
    path: PathBuf,
}

/// Encode every file under `src` into `dst`
///
/// Fails if `dst` already holds a manifest.
pub fn pack_dir(src: &Path, dst: &Path, codec: &dyn FileCodec) -> Result<ArchiveReport> {
    if !src.is_dir() {
        return Err(VaultError::Archive(format!("{} is not a directory", src.display())));
    }
    if dst.join(MANIFEST_NAME).exists() {
        return Err(VaultError::Archive(format!("{} is already packed", dst.display())));
    }

    let mut files = Vec::new();
    collect_files(src, Path::new(""), &mut files)?;

    fs::create_dir_all(dst)?;
    let mut report = ArchiveReport::default();
    let mut manifest = format!("codec {}\n", codec.name());

    for rel in &files {
        let raw = fs::read(src.join(rel))?;
        let packed = codec.encode(&raw)?;

        let target = dst.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &packed)?;

        manifest.push_str(&format!(
            "file {:08x} {} {}\n",
            crc32fast::hash(&raw),
            raw.len(),
            portable(rel)?
        ));
        report.files += 1;
        report.original_bytes += raw.len() as u64;
        report.packed_bytes += packed.len() as u64;
    }

    fs::write(dst.join(MANIFEST_NAME), manifest)?;
    tracing::info!(
        "Packed {} files from {} with {} ({} -> {} bytes)",
        report.files,
        src.display(),
        codec.name(),
        report.original_bytes,
        report.packed_bytes
    );
    Ok(report)
}

/// Restore every file listed in the manifest under `src` into `dst`
///
/// The codec must match the one recorded at pack time, and every restored
/// file must match its recorded checksum and length.
pub fn unpack_dir(src: &Path, dst: &Path, codec: &dyn FileCodec) -> Result<ArchiveReport> {
    let text = fs::read_to_string(src.join(MANIFEST_NAME))
        .map_err(|e| VaultError::Archive(format!("no manifest in {}: {}", src.display(), e)))?;
    let (recorded, entries) = parse_manifest(&text)?;
    if recorded != codec.name() {
        return Err(VaultError::Archive(format!(
            "archive was packed with '{}', not '{}'",
            recorded,
            codec.name()
        )));
    }

    let mut report = ArchiveReport::default();
    for entry in &entries {
        let packed = fs::read(src.join(&entry.path))?;
        let raw = codec.decode(&packed)?;
        if raw.len() as u64 != entry.len || crc32fast::hash(&raw) != entry.crc {
            return Err(VaultError::Archive(format!(
                "{} does not match its manifest checksum",
                entry.path.display()
            )));
        }

        let target = dst.join(&entry.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &raw)?;

        report.files += 1;
        report.original_bytes += raw.len() as u64;
        report.packed_bytes += packed.len() as u64;
    }

    tracing::info!("Unpacked {} files into {}", report.files, dst.display());
    Ok(report)
}

// =============================================================================
// Private Helpers
// =============================================================================

fn collect_files(root: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(root.join(rel))?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let child = rel.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            collect_files(root, &child, out)?;
        } else if child != Path::new(MANIFEST_NAME) {
            out.push(child);
        }
    }
    Ok(())
}

/// Relative path with `/` separators and no spaces to break the line format
fn portable(rel: &Path) -> Result<String> {
    let parts = rel
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .filter(|s| !s.contains(char::is_whitespace))
                .ok_or_else(|| VaultError::Archive(format!("cannot record file name {}", rel.display())))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

fn parse_manifest(text: &str) -> Result<(String, Vec<ManifestEntry>)> {
    let bad = |line: &str| VaultError::Archive(format!("bad manifest line '{}'", line));

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let codec = lines
        .next()
        .and_then(|l| l.strip_prefix("codec "))
        .map(|c| c.trim().to_string())
        .ok_or_else(|| VaultError::Archive("manifest does not name a codec".to_string()))?;

    let mut entries = Vec::new();
    for line in lines {
        let mut fields = line.split(' ');
        let (Some("file"), Some(crc), Some(len), Some(path), None) =
            (fields.next(), fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(bad(line));
        };

        let crc = u32::from_str_radix(crc, 16).map_err(|_| bad(line))?;
        let len = len.parse::<u64>().map_err(|_| bad(line))?;
        let path: PathBuf = path.split('/').collect();
        if path.is_absolute() || path.components().any(|c| c.as_os_str() == "..") {
            return Err(bad(line));
        }
        entries.push(ManifestEntry { crc, len, path });
    }
    Ok((codec, entries))
}
