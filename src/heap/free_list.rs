//! Free-list allocator
//!
//! The list is threaded through the heap file: the header holds the root,
//! each free slot holds the address of the next one right after its length
//! field. Links are plain offsets, validated on every hop.

use crate::error::{Result, VaultError};

use super::file::HeapFile;
use super::slot::{SlotHeader, SlotTag};
use super::{FREE_ROOT_OFFSET, HEADER_SIZE, MIN_SLOT_CAPACITY, NO_SLOT, SLOT_HEADER_SIZE};

impl HeapFile {
    /// Unlink and return the first free slot with capacity > `needed`
    pub(super) fn take_first_fit(&mut self, needed: usize) -> Result<Option<SlotHeader>> {
        let mut walk = FreeWalk::new(self.len);
        let mut prev: Option<u64> = None;
        let mut cursor = self.free_root()?;

        while cursor != NO_SLOT {
            let slot = self.free_node(cursor, &mut walk)?;
            let next = self.next_free(&slot)?;

            if slot.capacity > needed {
                self.set_link(prev, next)?;
                return Ok(Some(slot));
            }

            prev = Some(slot.address);
            cursor = next;
        }
        Ok(None)
    }

    /// Link a just-tombstoned slot into the free list
    ///
    /// Goes in front of the first node with a strictly larger capacity, or
    /// at the tail when there is none.
    pub(super) fn link_free(&mut self, address: u64, capacity: usize) -> Result<()> {
        let mut walk = FreeWalk::new(self.len);
        let mut prev: Option<u64> = None;
        let mut cursor = self.free_root()?;

        while cursor != NO_SLOT {
            let slot = self.free_node(cursor, &mut walk)?;
            if slot.capacity > capacity {
                break;
            }
            prev = Some(slot.address);
            cursor = self.next_free(&slot)?;
        }

        self.write_raw(address + SLOT_HEADER_SIZE, &cursor.to_be_bytes())?;
        self.set_link(prev, address as i64)
    }

    /// Addresses on the free list, root first
    pub(super) fn free_list_addresses(&mut self) -> Result<Vec<u64>> {
        let mut walk = FreeWalk::new(self.len);
        let mut addresses = Vec::new();
        let mut cursor = self.free_root()?;

        while cursor != NO_SLOT {
            let slot = self.free_node(cursor, &mut walk)?;
            addresses.push(slot.address);
            cursor = self.next_free(&slot)?;
        }
        Ok(addresses)
    }

    /// Number of slots on the free list
    pub fn free_list_len(&mut self) -> Result<usize> {
        Ok(self.free_list_addresses()?.len())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Validate a free-list pointer and load the slot it names
    fn free_node(&mut self, pointer: i64, walk: &mut FreeWalk) -> Result<SlotHeader> {
        walk.step(pointer)?;

        let address = u64::try_from(pointer)
            .ok()
            .filter(|&a| a >= HEADER_SIZE && a < self.len)
            .ok_or_else(|| {
                VaultError::Corruption(format!(
                    "free list pointer {} outside heap file bounds ({}..{})",
                    pointer, HEADER_SIZE, self.len
                ))
            })?;

        let slot = self.slot_header(address)?;
        if slot.tag != SlotTag::Free {
            return Err(VaultError::Corruption(format!(
                "free list references live slot at {}",
                address
            )));
        }
        if slot.capacity < MIN_SLOT_CAPACITY {
            return Err(VaultError::Corruption(format!(
                "free slot at {} is too small ({} bytes) to hold a link",
                address, slot.capacity
            )));
        }
        Ok(slot)
    }

    fn next_free(&mut self, slot: &SlotHeader) -> Result<i64> {
        let mut raw = [0u8; 8];
        self.read_raw(slot.payload_offset(), &mut raw)?;
        Ok(i64::from_be_bytes(raw))
    }

    /// Point `prev` (or the header root when `None`) at `target`
    fn set_link(&mut self, prev: Option<u64>, target: i64) -> Result<()> {
        let offset = match prev {
            Some(address) => address + SLOT_HEADER_SIZE,
            None => FREE_ROOT_OFFSET,
        };
        self.write_raw(offset, &target.to_be_bytes())
    }
}

/// Hop counter that turns a cycle into a corruption error
struct FreeWalk {
    hops: u64,
    limit: u64,
}

impl FreeWalk {
    fn new(file_len: u64) -> Self {
        // No file can hold more slots than this
        let limit = file_len.saturating_sub(HEADER_SIZE) / (SLOT_HEADER_SIZE + MIN_SLOT_CAPACITY as u64) + 1;
        Self { hops: 0, limit }
    }

    fn step(&mut self, pointer: i64) -> Result<()> {
        self.hops += 1;
        if self.hops > self.limit {
            return Err(VaultError::Corruption(format!(
                "free list cycle detected at pointer {}",
                pointer
            )));
        }
        Ok(())
    }
}
