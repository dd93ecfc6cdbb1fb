//! Error types for petvault
//!
//! Provides a unified error type for all operations.
//!
//! Absence is not an error: reads return `Ok(None)` or an empty `Vec`.
//! Domain rule violations are reported as [`VaultError::Validation`] and are
//! always raised before any file is touched.

use thiserror::Error;

/// Result type alias using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;

/// Unified error type for petvault operations
#[derive(Debug, Error)]
pub enum VaultError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Encoding error: {0}")]
    Encoding(String),

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Collaborator Errors
    // -------------------------------------------------------------------------
    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

impl VaultError {
    /// True when the error is a domain rule violation the caller can act on
    pub fn is_validation(&self) -> bool {
        matches!(self, VaultError::Validation(_))
    }

    /// True when the error reports damaged on-disk structures
    pub fn is_corruption(&self) -> bool {
        matches!(self, VaultError::Corruption(_))
    }
}

/// Domain rule violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A natural key that must be unique is already taken
    #[error("{entity} with key '{key}' already exists")]
    Duplicate { entity: &'static str, key: String },

    /// A referenced parent record does not exist
    #[error("{entity} {id} does not exist")]
    MissingReference { entity: &'static str, id: i32 },

    /// The record being changed does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },

    /// A field value is not acceptable
    #[error("{0}")]
    Invalid(String),
}
