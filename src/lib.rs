//! # petvault
//!
//! An embedded, file-backed record store for a pet-care business with:
//! - Heap files holding variable-length records and a free list of reclaimed slots
//! - A sorted primary index per entity (id → address)
//! - Extensible hashing for grouping and natural-key lookups
//! - A B+-tree for unique composite keys with ordered range scans
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                               │
//! │           (referential rules, cascades, check)               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Repositories                             │
//! │       customers · pets · services · bookings                 │
//! └──────┬──────────────┬───────────────┬───────────────┬───────┘
//!        │              │               │               │
//!        ▼              ▼               ▼               ▼
//! ┌────────────┐ ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//! │  HeapFile  │ │PrimaryIndex │ │  HashIndex  │ │  TreeIndex  │
//! │ (slots +   │ │  (sorted    │ │ (extensible │ │  (B+-tree)  │
//! │ free list) │ │   array)    │ │  hashing)   │ │             │
//! └────────────┘ └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! Single process, single writer. There is no write-ahead log: a failure
//! halfway through a mutation is repaired with [`Store::rebuild_indexes`].

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod heap;
pub mod index;
pub mod record;

pub mod model;
pub mod repository;
pub mod store;

pub mod archive;
pub mod cipher;
pub mod search;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, SyncStrategy};
pub use error::{Result, ValidationError, VaultError};
pub use model::{Booking, Customer, Pet, Service};
pub use store::{IntegrityReport, Removed, Store, StoreStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of petvault
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
