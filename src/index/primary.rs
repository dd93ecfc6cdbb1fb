//! Primary Index
//!
//! Sorted array of `(id, address)` pairs mirrored to a flat side file.
//!
//! ## File Format
//! ```text
//! ┌──────────┬──────────────┐
//! │ Id (4)   │ Address (8)  │   ... repeated, ascending by id
//! └──────────┴──────────────┘
//! ```
//!
//! Lookups are binary searches over the in-memory array. Every mutation
//! rewrites the whole side file, so mutation cost grows linearly with the
//! number of records.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};

use crate::config::SyncStrategy;
use crate::error::{Result, VaultError};

/// Bytes per persisted entry: Id (4) + Address (8)
pub const ENTRY_SIZE: usize = 12;

/// One `(id, address)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: i32,
    pub address: u64,
}

/// id → heap address, sorted ascending by id
pub struct PrimaryIndex {
    path: PathBuf,
    file: File,
    entries: Vec<IndexEntry>,
    sync_strategy: SyncStrategy,
}

impl PrimaryIndex {
    /// Open or create the side file and load every entry
    pub fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        let entries = decode_entries(path, &raw)?;

        tracing::trace!("Loaded {} primary index entries from {}", entries.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
            sync_strategy,
        })
    }

    /// Add an id; the id must not already be present
    pub fn insert(&mut self, id: i32, address: u64) -> Result<()> {
        let pos = self.entries.partition_point(|e| e.id < id);
        if self.entries.get(pos).is_some_and(|e| e.id == id) {
            return Err(VaultError::Corruption(format!(
                "id {} is already present in primary index {}",
                id,
                self.path.display()
            )));
        }
        self.entries.insert(pos, IndexEntry { id, address });
        self.persist()
    }

    /// Address for an id
    pub fn lookup(&self, id: i32) -> Option<u64> {
        self.position(id).map(|pos| self.entries[pos].address)
    }

    /// Drop an id; returns false if it was absent
    pub fn remove(&mut self, id: i32) -> Result<bool> {
        match self.position(id) {
            Some(pos) => {
                self.entries.remove(pos);
                self.persist()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Repoint an id at a new address; returns false if it was absent
    pub fn update(&mut self, id: i32, address: u64) -> Result<bool> {
        match self.position(id) {
            Some(pos) => {
                self.entries[pos].address = address;
                self.persist()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the whole index (repair path), persisting once
    pub fn rebuild(&mut self, mut entries: Vec<IndexEntry>) -> Result<()> {
        entries.sort_by_key(|e| e.id);
        if let Some(pair) = entries.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(VaultError::Corruption(format!(
                "id {} appears twice while rebuilding {}",
                pair[0].id,
                self.path.display()
            )));
        }
        self.entries = entries;
        self.persist()
    }

    /// Entries in ascending id order
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn position(&self, id: i32) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |e| e.id).ok()
    }

    /// Rewrite the side file from scratch
    fn persist(&mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(self.entries.len() * ENTRY_SIZE);
        for entry in &self.entries {
            buf.put_i32(entry.id);
            buf.put_i64(entry.address as i64);
        }

        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        if self.sync_strategy == SyncStrategy::EveryWrite {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

fn decode_entries(path: &Path, raw: &[u8]) -> Result<Vec<IndexEntry>> {
    if raw.len() % ENTRY_SIZE != 0 {
        return Err(VaultError::Corruption(format!(
            "primary index {} has {} bytes, not a multiple of {}",
            path.display(),
            raw.len(),
            ENTRY_SIZE
        )));
    }

    let mut buf = raw;
    let mut entries = Vec::with_capacity(raw.len() / ENTRY_SIZE);
    while buf.has_remaining() {
        let id = buf.get_i32();
        let address = buf.get_i64();
        let address = u64::try_from(address).map_err(|_| {
            VaultError::Corruption(format!("negative address {} for id {}", address, id))
        })?;
        entries.push(IndexEntry { id, address });
    }

    entries.sort_by_key(|e| e.id);
    if let Some(pair) = entries.windows(2).find(|w| w[0].id == w[1].id) {
        return Err(VaultError::Corruption(format!(
            "duplicate id {} in primary index {}",
            pair[0].id,
            path.display()
        )));
    }
    Ok(entries)
}
