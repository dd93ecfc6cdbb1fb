//! Heap File
//!
//! Slot-level create / read / update / delete over a single data file.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use crate::config::SyncStrategy;
use crate::error::{Result, VaultError};

use super::slot::{SlotHeader, SlotTag};
use super::{FREE_ROOT_OFFSET, HEADER_SIZE, MAX_PAYLOAD_SIZE, MIN_SLOT_CAPACITY, NO_SLOT, SLOT_HEADER_SIZE};

/// Where an updated payload ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Overwritten inside the existing slot
    InPlace(u64),

    /// Old slot freed, payload written at a new address
    Relocated { from: u64, to: u64 },
}

impl UpdateOutcome {
    /// Address now holding the payload
    pub fn address(&self) -> u64 {
        match *self {
            UpdateOutcome::InPlace(address) => address,
            UpdateOutcome::Relocated { to, .. } => to,
        }
    }
}

/// Result of a full structural check of a heap file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapReport {
    pub live_slots: usize,
    pub free_slots: usize,
    pub free_list_len: usize,
    pub file_len: u64,
}

/// A single heap file
pub struct HeapFile {
    /// Path of the data file
    path: PathBuf,
    /// Open handle, read and write
    pub(super) file: File,
    /// Current file length (tracked to avoid metadata calls)
    pub(super) len: u64,
    /// When to fsync
    sync_strategy: SyncStrategy,
}

impl HeapFile {
    /// Open or create a heap file
    ///
    /// A new file gets a header with last id 0 and an empty free list.
    pub fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        let mut heap = Self {
            path: path.to_path_buf(),
            file,
            len,
            sync_strategy,
        };

        if len == 0 {
            let mut header = BytesMut::with_capacity(HEADER_SIZE as usize);
            header.put_i32(0);
            header.put_i64(NO_SLOT);
            heap.write_raw(0, &header)?;
            heap.len = HEADER_SIZE;
            heap.after_write()?;
        } else if len < HEADER_SIZE {
            return Err(VaultError::Corruption(format!(
                "heap file {} is {} bytes, shorter than its header",
                path.display(),
                len
            )));
        }

        tracing::trace!("Opened heap file {} ({} bytes)", path.display(), heap.len);
        Ok(heap)
    }

    // =========================================================================
    // Header
    // =========================================================================

    /// Last id handed out (0 if none)
    pub fn last_id(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        self.read_raw(0, &mut raw)?;
        Ok(i32::from_be_bytes(raw))
    }

    /// Reserve the next record id; ids are never reused
    pub fn allocate_id(&mut self) -> Result<i32> {
        let next = self
            .last_id()?
            .checked_add(1)
            .ok_or_else(|| VaultError::Encoding("record id space exhausted".to_string()))?;
        self.write_raw(0, &next.to_be_bytes())?;
        self.after_write()?;
        Ok(next)
    }

    pub(super) fn free_root(&mut self) -> Result<i64> {
        let mut raw = [0u8; 8];
        self.read_raw(FREE_ROOT_OFFSET, &mut raw)?;
        Ok(i64::from_be_bytes(raw))
    }

    // =========================================================================
    // Slot Operations
    // =========================================================================

    /// Store a payload and return its address
    ///
    /// Reuses the first free slot with enough room, otherwise appends.
    pub fn create(&mut self, payload: &[u8]) -> Result<u64> {
        check_payload_len(payload)?;

        let address = match self.take_first_fit(payload.len())? {
            Some(slot) => {
                tracing::debug!(
                    "Reusing free slot at {} (capacity {}) for {} bytes",
                    slot.address,
                    slot.capacity,
                    payload.len()
                );
                self.write_raw(slot.address, &[SlotTag::Live.as_byte()])?;
                self.write_payload(&slot, payload)?;
                slot.address
            }
            None => self.append(payload)?,
        };

        self.after_write()?;
        tracing::trace!("Created {} byte record at {}", payload.len(), address);
        Ok(address)
    }

    /// Read the payload at an address
    ///
    /// Returns `Ok(None)` if the slot is free (stale address). The returned
    /// bytes span the whole slot capacity, zero-padded past the last write.
    pub fn read_at(&mut self, address: u64) -> Result<Option<Vec<u8>>> {
        let slot = self.slot_header(address)?;
        if slot.tag == SlotTag::Free {
            return Ok(None);
        }

        let mut payload = vec![0u8; slot.capacity];
        self.read_raw(slot.payload_offset(), &mut payload)?;
        Ok(Some(payload))
    }

    /// Replace the payload at an address
    ///
    /// Returns `Ok(None)` if the slot is free. A payload that does not fit
    /// frees the old slot and is written elsewhere; the caller must repoint
    /// its indices at the new address.
    pub fn update_at(&mut self, address: u64, payload: &[u8]) -> Result<Option<UpdateOutcome>> {
        check_payload_len(payload)?;

        let slot = self.slot_header(address)?;
        if slot.tag == SlotTag::Free {
            return Ok(None);
        }

        if payload.len() <= slot.capacity {
            self.write_payload(&slot, payload)?;
            self.after_write()?;
            return Ok(Some(UpdateOutcome::InPlace(address)));
        }

        self.write_raw(address, &[SlotTag::Free.as_byte()])?;
        self.link_free(address, slot.capacity)?;
        let to = self.create(payload)?;

        tracing::debug!(
            "Relocated record from {} to {} ({} -> {} bytes)",
            address,
            to,
            slot.capacity,
            payload.len()
        );
        Ok(Some(UpdateOutcome::Relocated { from: address, to }))
    }

    /// Tombstone the slot at an address and link it into the free list
    ///
    /// Returns false if the slot was already free.
    pub fn delete_at(&mut self, address: u64) -> Result<bool> {
        let slot = self.slot_header(address)?;
        if slot.tag == SlotTag::Free {
            return Ok(false);
        }

        self.write_raw(address, &[SlotTag::Free.as_byte()])?;
        self.link_free(address, slot.capacity)?;
        self.after_write()?;

        tracing::trace!("Deleted slot at {} (capacity {})", address, slot.capacity);
        Ok(true)
    }

    /// Liveness tag of the slot at an address
    pub fn tag_at(&mut self, address: u64) -> Result<SlotTag> {
        Ok(self.slot_header(address)?.tag)
    }

    /// Capacity of the slot at an address
    pub fn capacity_at(&mut self, address: u64) -> Result<usize> {
        Ok(self.slot_header(address)?.capacity)
    }

    // =========================================================================
    // Sequential Access
    // =========================================================================

    /// Every live slot in file order as `(address, payload)`
    pub fn scan(&mut self) -> Result<Vec<(u64, Vec<u8>)>> {
        let slots = self.walk_slots()?;
        Ok(slots
            .into_iter()
            .filter_map(|(slot, payload)| match slot.tag {
                SlotTag::Live => Some((slot.address, payload)),
                SlotTag::Free => None,
            })
            .collect())
    }

    /// Check the free list against a full pass over the file
    ///
    /// Every tombstoned slot must be on the free list, and the free list must
    /// only reach tombstoned slots.
    pub fn verify(&mut self) -> Result<HeapReport> {
        let slots = self.walk_slots()?;

        let mut report = HeapReport {
            file_len: self.len,
            ..HeapReport::default()
        };
        let mut tombstoned = BTreeSet::new();
        for (slot, _) in &slots {
            match slot.tag {
                SlotTag::Live => report.live_slots += 1,
                SlotTag::Free => {
                    report.free_slots += 1;
                    tombstoned.insert(slot.address);
                }
            }
        }

        let listed = self.free_list_addresses()?;
        report.free_list_len = listed.len();

        let listed_set: BTreeSet<u64> = listed.iter().copied().collect();
        if let Some(missing) = tombstoned.difference(&listed_set).next() {
            return Err(VaultError::Corruption(format!(
                "free slot at {} is not on the free list",
                missing
            )));
        }

        Ok(report)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush file contents to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Current file length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when the file holds nothing but its header
    pub fn is_empty(&self) -> bool {
        self.len == HEADER_SIZE
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Append a new slot at end of file
    fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let capacity = payload.len().max(MIN_SLOT_CAPACITY);
        let address = self.len;

        let mut slot = BytesMut::with_capacity(SLOT_HEADER_SIZE as usize + capacity);
        slot.put_u8(SlotTag::Live.as_byte());
        slot.put_u16(capacity as u16);
        slot.put_slice(payload);
        slot.put_bytes(0, capacity - payload.len());

        self.write_raw(address, &slot)?;
        self.len += slot.len() as u64;
        Ok(address)
    }

    /// Overwrite a slot's payload area, zeroing what the payload leaves unused
    fn write_payload(&mut self, slot: &SlotHeader, payload: &[u8]) -> Result<()> {
        let mut body = BytesMut::with_capacity(slot.capacity);
        body.put_slice(payload);
        body.put_bytes(0, slot.capacity - payload.len());
        self.write_raw(slot.payload_offset(), &body)
    }

    /// Read and bounds-check the slot prefix at an address
    pub(super) fn slot_header(&mut self, address: u64) -> Result<SlotHeader> {
        if address < HEADER_SIZE || address + SLOT_HEADER_SIZE > self.len {
            return Err(VaultError::Corruption(format!(
                "slot address {} outside heap file bounds ({}..{})",
                address, HEADER_SIZE, self.len
            )));
        }

        let mut raw = [0u8; 3];
        self.read_raw(address, &mut raw)?;
        let slot = SlotHeader::parse(address, raw)?;

        if slot.end() > self.len {
            return Err(VaultError::Corruption(format!(
                "slot at {} declares {} bytes, past end of file ({})",
                address, slot.capacity, self.len
            )));
        }
        Ok(slot)
    }

    /// Parse every slot from the header to end of file
    fn walk_slots(&mut self) -> Result<Vec<(SlotHeader, Vec<u8>)>> {
        let mut data = vec![0u8; (self.len - HEADER_SIZE) as usize];
        self.read_raw(HEADER_SIZE, &mut data)?;

        let mut slots = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            let address = HEADER_SIZE + pos as u64;
            if pos + SLOT_HEADER_SIZE as usize > data.len() {
                return Err(VaultError::Corruption(format!(
                    "truncated slot header at {}",
                    address
                )));
            }
            let slot = SlotHeader::parse(address, [data[pos], data[pos + 1], data[pos + 2]])?;
            let start = pos + SLOT_HEADER_SIZE as usize;
            let end = start + slot.capacity;
            if end > data.len() {
                return Err(VaultError::Corruption(format!(
                    "slot at {} declares {} bytes, past end of file ({})",
                    address, slot.capacity, self.len
                )));
            }
            slots.push((slot, data[start..end].to_vec()));
            pos = end;
        }
        Ok(slots)
    }

    pub(super) fn read_raw(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub(super) fn write_raw(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn after_write(&mut self) -> Result<()> {
        if self.sync_strategy == SyncStrategy::EveryWrite {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

fn check_payload_len(payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(VaultError::Encoding(format!(
            "payload of {} bytes exceeds slot limit of {}",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    Ok(())
}
