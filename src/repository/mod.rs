//! Repository Module
//!
//! Per-entity storage: one heap file, its primary index, and the secondary
//! indexes that entity needs.
//!
//! ## Mutation Order
//! 1. Uniqueness checks through index lookups (no file touched yet)
//! 2. Heap file mutation
//! 3. Primary index, then every secondary index, in the same call
//!
//! Cross-entity rules (missing parents, cascades) live in [`crate::store`].

mod booking;
mod customer;
mod pet;
mod service;

pub use booking::BookingRepository;
pub use customer::CustomerRepository;
pub use pet::PetRepository;
pub use service::ServiceRepository;

use std::collections::BTreeSet;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;

use crate::config::{Config, SyncStrategy};
use crate::error::{Result, VaultError};
use crate::heap::{HeapFile, HeapReport, UpdateOutcome};
use crate::index::{HashIndex, HashKey, HashSettings, IndexEntry, PrimaryIndex};
use crate::record::Record;

/// Health of one entity's files, as found by a check
#[derive(Debug, Clone, Default)]
pub struct EntityReport {
    pub entity: &'static str,
    pub heap: HeapReport,
    pub records: usize,
    /// Human-readable descriptions of every disagreement found
    pub issues: Vec<String>,
}

impl EntityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Size figures for one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityStats {
    pub entity: &'static str,
    pub records: usize,
    pub last_id: i32,
    pub heap_bytes: u64,
    pub free_slots: usize,
}

/// Heap file plus primary index for one record type
///
/// ## File Layout
/// ```text
///   {dir}/{name}.db    heap file
///   {dir}/{name}.idx   primary index side file
/// ```
pub struct EntityFile<T: Record> {
    heap: HeapFile,
    primary: PrimaryIndex,
    _record: PhantomData<T>,
}

impl<T: Record> EntityFile<T> {
    pub fn open(dir: &Path, name: &str, sync_strategy: SyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let heap = HeapFile::open(&dir.join(format!("{}.db", name)), sync_strategy)?;
        let primary = PrimaryIndex::open(&dir.join(format!("{}.idx", name)), sync_strategy)?;

        tracing::debug!("Opened {} file in {} ({} records)", T::ENTITY, dir.display(), primary.len());
        Ok(Self {
            heap,
            primary,
            _record: PhantomData,
        })
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Assign the next id, store the record and index it; returns the id
    ///
    /// The payload is encoded before anything is written, so an encoding
    /// failure leaves both files untouched. On any error the record keeps
    /// the id it came in with.
    pub fn create(&mut self, record: &mut T) -> Result<i32> {
        let previous = record.id();
        match self.store_new(record) {
            Ok(id) => Ok(id),
            Err(e) => {
                record.set_id(previous);
                Err(e)
            }
        }
    }

    fn store_new(&mut self, record: &mut T) -> Result<i32> {
        let id = self
            .heap
            .last_id()?
            .checked_add(1)
            .ok_or_else(|| VaultError::Encoding("record id space exhausted".to_string()))?;

        record.set_id(id);
        let payload = record.to_bytes()?;

        let address = self.heap.create(&payload)?;
        self.heap.allocate_id()?;
        self.primary.insert(id, address)?;

        tracing::trace!("Created {} {} at {}", T::ENTITY, id, address);
        Ok(id)
    }

    /// Record with `id`, if it is live
    pub fn read(&mut self, id: i32) -> Result<Option<T>> {
        let Some(address) = self.primary.lookup(id) else {
            return Ok(None);
        };
        match self.heap.read_at(address)? {
            Some(payload) => Ok(Some(T::from_bytes(&payload)?)),
            None => Ok(None),
        }
    }

    /// Rewrite a record in place or relocate it; returns false if absent
    pub fn update(&mut self, record: &T) -> Result<bool> {
        let Some(address) = self.primary.lookup(record.id()) else {
            return Ok(false);
        };
        let payload = record.to_bytes()?;

        match self.heap.update_at(address, &payload)? {
            None => Ok(false),
            Some(UpdateOutcome::InPlace(_)) => Ok(true),
            Some(UpdateOutcome::Relocated { to, .. }) => {
                self.primary.update(record.id(), to)?;
                Ok(true)
            }
        }
    }

    /// Tombstone a record and drop it from the primary index
    ///
    /// Returns the record as it was, so callers can clean secondary indexes.
    pub fn delete(&mut self, id: i32) -> Result<Option<T>> {
        let Some(address) = self.primary.lookup(id) else {
            return Ok(None);
        };
        let Some(payload) = self.heap.read_at(address)? else {
            return Ok(None);
        };
        let record = T::from_bytes(&payload)?;

        self.heap.delete_at(address)?;
        self.primary.remove(id)?;
        tracing::trace!("Deleted {} {} from {}", T::ENTITY, id, address);
        Ok(Some(record))
    }

    pub fn exists(&self, id: i32) -> bool {
        self.primary.lookup(id).is_some()
    }

    // =========================================================================
    // Scans
    // =========================================================================

    /// Every live record in file order
    pub fn scan(&mut self) -> Result<Vec<T>> {
        self.heap
            .scan()?
            .into_iter()
            .map(|(_, payload)| T::from_bytes(&payload))
            .collect()
    }

    pub fn find_all<F>(&mut self, mut predicate: F) -> Result<Vec<T>>
    where
        F: FnMut(&T) -> bool,
    {
        Ok(self.scan()?.into_iter().filter(|r| predicate(r)).collect())
    }

    pub fn find_first<F>(&mut self, mut predicate: F) -> Result<Option<T>>
    where
        F: FnMut(&T) -> bool,
    {
        for (_, payload) in self.heap.scan()? {
            let record = T::from_bytes(&payload)?;
            if predicate(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Repair
    // =========================================================================

    /// Rebuild the primary index from a full heap scan
    pub fn rebuild_index(&mut self) -> Result<usize> {
        let entries = self
            .heap
            .scan()?
            .into_iter()
            .map(|(address, payload)| {
                T::from_bytes(&payload).map(|record| IndexEntry {
                    id: record.id(),
                    address,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let count = entries.len();
        self.primary.rebuild(entries)?;
        tracing::debug!("Rebuilt {} primary index ({} entries)", T::ENTITY, count);
        Ok(count)
    }

    /// Check the heap free list and primary index against each other
    ///
    /// Corruption found along the way is recorded as an issue, not returned.
    pub fn check(&mut self) -> Result<EntityReport> {
        let mut report = EntityReport {
            entity: T::ENTITY,
            ..EntityReport::default()
        };

        match self.heap.verify() {
            Ok(heap) => report.heap = heap,
            Err(e) if e.is_corruption() => {
                report.issues.push(format!("{} heap: {}", T::ENTITY, e));
                return Ok(report);
            }
            Err(e) => return Err(e),
        }

        let mut live = BTreeSet::new();
        for (address, payload) in self.heap.scan()? {
            match T::from_bytes(&payload) {
                Ok(record) => {
                    live.insert(address);
                    report.records += 1;
                    if self.primary.lookup(record.id()) != Some(address) {
                        report
                            .issues
                            .push(format!("{} {} at {} is not indexed", T::ENTITY, record.id(), address));
                    }
                }
                Err(e) => report
                    .issues
                    .push(format!("{} slot at {} does not decode: {}", T::ENTITY, address, e)),
            }
        }

        for entry in self.primary.iter() {
            if !live.contains(&entry.address) {
                report.issues.push(format!(
                    "{} {} points at {}, which is not a live slot",
                    T::ENTITY,
                    entry.id,
                    entry.address
                ));
            }
        }
        Ok(report)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Ids in ascending order
    pub fn ids(&self) -> Vec<i32> {
        self.primary.iter().map(|e| e.id).collect()
    }

    pub fn stats(&mut self) -> Result<EntityStats> {
        Ok(EntityStats {
            entity: T::ENTITY,
            records: self.primary.len(),
            last_id: self.heap.last_id()?,
            heap_bytes: self.heap.len(),
            free_slots: self.heap.free_list_len()?,
        })
    }

    /// Current heap file length
    pub fn heap_len(&self) -> u64 {
        self.heap.len()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.heap.sync()?;
        self.primary.sync()
    }
}

// =============================================================================
// Secondary Index Helpers
// =============================================================================

/// Open `<dir>/<name>.hdir|.hbkt` with the configured bucket shape
pub(crate) fn open_hash_index(dir: &Path, name: &str, config: &Config) -> Result<HashIndex> {
    HashIndex::open(
        &dir.join(name),
        HashSettings {
            capacity: config.bucket_capacity,
            max_depth: config.max_global_depth,
        },
        config.sync_strategy,
    )
}

/// Refill a hash index from every live record
pub(crate) fn rebuild_hash_index<T: Record>(
    file: &mut EntityFile<T>,
    index: &mut HashIndex,
    key_of: impl Fn(&T) -> HashKey,
) -> Result<usize> {
    index.clear()?;
    let records = file.scan()?;
    for record in &records {
        index.insert(key_of(record), record.id())?;
    }
    tracing::debug!("Rebuilt {} hash index ({} entries)", T::ENTITY, records.len());
    Ok(records.len())
}

/// Record every disagreement between a hash index and the live records
pub(crate) fn check_hash_index<T: Record>(
    file: &mut EntityFile<T>,
    index: &HashIndex,
    key_of: impl Fn(&T) -> HashKey,
    issues: &mut Vec<String>,
) -> Result<()> {
    let records = file.scan()?;
    let expected: BTreeSet<(HashKey, i32)> = records.iter().map(|r| (key_of(r), r.id())).collect();
    let indexed: BTreeSet<(HashKey, i32)> = index.entries().into_iter().collect();

    for (key, id) in expected.difference(&indexed) {
        issues.push(format!("{} {} is missing from its hash index (key {:08x})", T::ENTITY, id, key));
    }
    for (key, id) in indexed.difference(&expected) {
        issues.push(format!("hash index holds stale {} {} (key {:08x})", T::ENTITY, id, key));
    }
    Ok(())
}
