//! Configuration for petvault
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, VaultError};

/// Largest directory depth accepted by [`Config::validate`]
pub const MAX_SUPPORTED_DEPTH: u8 = 24;

/// Main configuration for a petvault store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── customers/   (heap file, primary index, cpf hash index)
    ///     ├── pets/        (heap file, primary index, owner hash index)
    ///     ├── services/    (heap file, primary index, name hash index)
    ///     ├── bookings/    (heap file, primary index, booking B+-tree)
    ///     └── keys/        (field cipher key ring)
    pub data_dir: PathBuf,

    /// When to fsync heap and index files
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Hash Index Configuration
    // -------------------------------------------------------------------------
    /// Entries per bucket before a split is attempted
    pub bucket_capacity: usize,

    /// Directory depth at which buckets stop splitting and start chaining
    pub max_global_depth: u8,

    // -------------------------------------------------------------------------
    // Tree Index Configuration
    // -------------------------------------------------------------------------
    /// B+-tree order (max children per internal node)
    pub tree_order: usize,

    // -------------------------------------------------------------------------
    // Field Cipher Configuration
    // -------------------------------------------------------------------------
    /// Encipher the customer e-mail field before it reaches the heap file
    pub encrypt_fields: bool,
}

/// File sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync once when the store is closed
    OnClose,

    /// fsync after every mutating file write (safest, slowest)
    EveryWrite,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./petvault_data"),
            sync_strategy: SyncStrategy::OnClose,
            bucket_capacity: 5,
            max_global_depth: 10,
            tree_order: 5,
            encrypt_fields: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the index structures cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.bucket_capacity == 0 || self.bucket_capacity > u16::MAX as usize {
            return Err(VaultError::Config(format!(
                "bucket_capacity must be in 1..=65535, got {}",
                self.bucket_capacity
            )));
        }
        if self.max_global_depth == 0 || self.max_global_depth > MAX_SUPPORTED_DEPTH {
            return Err(VaultError::Config(format!(
                "max_global_depth must be in 1..={}, got {}",
                MAX_SUPPORTED_DEPTH, self.max_global_depth
            )));
        }
        if self.tree_order < 3 || self.tree_order > u16::MAX as usize {
            return Err(VaultError::Config(format!(
                "tree_order must be in 3..=65535, got {}",
                self.tree_order
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the file sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the number of entries per hash bucket
    pub fn bucket_capacity(mut self, capacity: usize) -> Self {
        self.config.bucket_capacity = capacity;
        self
    }

    /// Set the maximum hash directory depth
    pub fn max_global_depth(mut self, depth: u8) -> Self {
        self.config.max_global_depth = depth;
        self
    }

    /// Set the B+-tree order
    pub fn tree_order(mut self, order: usize) -> Self {
        self.config.tree_order = order;
        self
    }

    /// Enable or disable the field cipher
    pub fn encrypt_fields(mut self, enabled: bool) -> Self {
        self.config.encrypt_fields = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
