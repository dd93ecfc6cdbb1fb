//! Index Module
//!
//! Three independent index strategies layered over the heap file:
//!
//! ```text
//!   id ──────────► PrimaryIndex ──► heap address      (sorted array)
//!   group key ───► HashIndex ─────► { record id, .. } (extensible hashing)
//!   composite ───► TreeIndex ─────► record id         (B+-tree)
//! ```
//!
//! Secondary indexes store record ids, never heap addresses, so a record
//! that moves only needs its primary entry repointed.

pub mod hash;
pub mod primary;
pub mod tree;

pub use hash::{HashIndex, HashKey, HashSettings};
pub use primary::{IndexEntry, PrimaryIndex};
pub use tree::{TreeIndex, TreeKey};
