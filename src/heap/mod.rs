//! Heap File Module
//!
//! One binary file per entity type holding variable-length records at
//! explicit addresses, with deleted slots recycled through a free list
//! threaded through the file itself.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (12 bytes)                                       │
//! │   LastId: i32 (4) | FreeListRoot: i64 (8)               │
//! ├─────────────────────────────────────────────────────────┤
//! │ Slot                                                    │
//! │   [Tag: u8][Len: u16][Payload: Len bytes]               │
//! │   Tag ' ' = live, '*' = free                            │
//! │   ... repeated, addressed by byte offset ...            │
//! └─────────────────────────────────────────────────────────┘
//!
//! Free slot (tag '*'):
//!   [Tag][Len][NextFree: i64][stale bytes ...]
//!   NextFree = -1 ends the list
//! ```
//!
//! ## Allocation
//! - First fit: the first free slot whose capacity is strictly greater than
//!   the request is unlinked and reused whole. Slots are never split, so the
//!   `Len` field keeps the original capacity and the unused tail is zeroed.
//! - Freed slots are linked in before the first node with a larger capacity,
//!   or at the tail.
//! - Every slot has room for at least the 8-byte next pointer.

mod file;
mod free_list;
mod slot;

pub use file::{HeapFile, HeapReport, UpdateOutcome};
pub use slot::SlotTag;

// =============================================================================
// Shared Constants
// =============================================================================

/// Header size: LastId (4) + FreeListRoot (8) = 12 bytes
pub const HEADER_SIZE: u64 = 12;

/// Slot header size: Tag (1) + Len (2) = 3 bytes
pub const SLOT_HEADER_SIZE: u64 = 3;

/// Smallest slot capacity, so a freed slot can hold its next pointer
pub const MIN_SLOT_CAPACITY: usize = 8;

/// Largest payload a slot length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Free-list terminator
pub const NO_SLOT: i64 = -1;

/// Header offset of the free-list root pointer
pub(crate) const FREE_ROOT_OFFSET: u64 = 4;
