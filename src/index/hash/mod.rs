//! Hash Index (extensible hashing)
//!
//! Multi-valued map from a grouping key to record ids. One lookup returns
//! every id filed under the key.
//!
//! ## File Format
//! ```text
//! Directory (<name>.hdir), rewritten when it changes:
//! ┌──────────────────┬────────────────────────────────────┐
//! │ GlobalDepth (1)  │ BucketNo: u32 × 2^GlobalDepth       │
//! └──────────────────┴────────────────────────────────────┘
//!
//! Buckets (<name>.hbkt), rewritten one bucket at a time:
//! ┌──────────────────────────────────────────────────────────┐
//! │ Header: Capacity u16 (2) | MaxDepth u8 (1)               │
//! ├──────────────────────────────────────────────────────────┤
//! │ Bucket 0: [LocalDepth u8][Count u16][Overflow i32]       │
//! │           [(Key u32, Value i32) × Capacity]              │
//! │ Bucket 1: ...                                            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Growth
//! A full bucket whose local depth equals the global depth doubles the
//! directory first; then it splits on the next hash bit. Entries that share
//! one key can never be told apart by hash bits, so once a bucket reaches
//! the maximum depth it grows an overflow chain instead.

mod bucket;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};

use crate::config::{SyncStrategy, MAX_SUPPORTED_DEPTH};
use crate::error::{Result, VaultError};

use bucket::Bucket;

/// Grouping key stored in the index
pub type HashKey = u32;

/// Bucket file header: Capacity (2) + MaxDepth (1)
const BUCKET_FILE_HEADER: u64 = 3;

/// Bit source for directory addressing; stable across restarts
pub fn hash_of(key: HashKey) -> u32 {
    crc32fast::hash(&key.to_be_bytes())
}

/// Grouping key for a record id (owner id, parent id, ...)
pub fn id_key(id: i32) -> HashKey {
    id as u32
}

/// Grouping key for a normalized text value
pub fn text_key(text: &str) -> HashKey {
    crc32fast::hash(text.as_bytes())
}

/// Shape parameters of a hash index
#[derive(Debug, Clone, Copy)]
pub struct HashSettings {
    /// Entries per bucket
    pub capacity: usize,
    /// Depth at which buckets chain instead of splitting
    pub max_depth: u8,
}

/// Extensible hash index backed by a directory file and a bucket file
pub struct HashIndex {
    dir_path: PathBuf,
    dir_file: File,
    bucket_file: File,
    capacity: usize,
    max_depth: u8,
    global_depth: u8,
    /// Directory slot → bucket number
    directory: Vec<u32>,
    /// Bucket arena, addressed by bucket number
    buckets: Vec<Bucket>,
    len: usize,
    sync_strategy: SyncStrategy,
}

impl HashIndex {
    /// Open or create `<base>.hdir` / `<base>.hbkt`
    ///
    /// An existing index keeps the capacity and max depth it was created with.
    pub fn open(base: &Path, settings: HashSettings, sync_strategy: SyncStrategy) -> Result<Self> {
        let dir_path = base.with_extension("hdir");
        let bucket_path = base.with_extension("hbkt");

        let dir_file = open_rw(&dir_path)?;
        let mut bucket_file = open_rw(&bucket_path)?;

        let mut raw_buckets = Vec::new();
        bucket_file.read_to_end(&mut raw_buckets)?;

        let mut index = Self {
            dir_path,
            dir_file,
            bucket_file,
            capacity: settings.capacity,
            max_depth: settings.max_depth,
            global_depth: 0,
            directory: vec![0],
            buckets: vec![Bucket::new(0)],
            len: 0,
            sync_strategy,
        };

        if raw_buckets.is_empty() {
            index.write_all_files()?;
            return Ok(index);
        }

        let mut raw_dir = Vec::new();
        index.dir_file.read_to_end(&mut raw_dir)?;
        index.load(&raw_buckets, &raw_dir)?;

        if index.capacity != settings.capacity || index.max_depth != settings.max_depth {
            tracing::warn!(
                "Hash index {} keeps stored shape (capacity {}, max depth {}) over configured ({}, {})",
                index.dir_path.display(),
                index.capacity,
                index.max_depth,
                settings.capacity,
                settings.max_depth
            );
        }
        Ok(index)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// File `value` under `key`; returns false if that exact pair exists
    pub fn insert(&mut self, key: HashKey, value: i32) -> Result<bool> {
        if self.contains(key, value) {
            return Ok(false);
        }

        let hash = hash_of(key);
        loop {
            let number = self.bucket_for(hash);
            let bucket = &mut self.buckets[number];

            if bucket.entries.len() < self.capacity {
                bucket.entries.push((key, value));
                self.write_bucket(number)?;
                break;
            }

            if bucket.local_depth < self.max_depth {
                self.split(number)?;
                continue;
            }

            self.push_overflow(number, key, value)?;
            break;
        }

        self.len += 1;
        self.after_write()?;
        Ok(true)
    }

    /// Every value filed under `key`
    pub fn lookup(&self, key: HashKey) -> Vec<i32> {
        self.chain(self.bucket_for(hash_of(key)))
            .flat_map(|number| self.buckets[number].entries.iter())
            .filter(|(k, _)| *k == key)
            .map(|&(_, v)| v)
            .collect()
    }

    /// True if `value` is filed under `key`
    pub fn contains(&self, key: HashKey, value: i32) -> bool {
        self.chain(self.bucket_for(hash_of(key)))
            .any(|number| self.buckets[number].entries.contains(&(key, value)))
    }

    /// Remove one pair; returns false if it was absent
    ///
    /// Buckets are never merged back, they may stay sparse.
    pub fn delete(&mut self, key: HashKey, value: i32) -> Result<bool> {
        let chain: Vec<usize> = self.chain(self.bucket_for(hash_of(key))).collect();
        for number in chain {
            let entries = &mut self.buckets[number].entries;
            if let Some(pos) = entries.iter().position(|&e| e == (key, value)) {
                entries.remove(pos);
                self.write_bucket(number)?;
                self.len -= 1;
                self.after_write()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remove every pair filed under `key`; returns how many were removed
    pub fn delete_all(&mut self, key: HashKey) -> Result<usize> {
        let chain: Vec<usize> = self.chain(self.bucket_for(hash_of(key))).collect();
        let mut removed = 0;
        for number in chain {
            let entries = &mut self.buckets[number].entries;
            let before = entries.len();
            entries.retain(|(k, _)| *k != key);
            if entries.len() != before {
                removed += before - entries.len();
                self.write_bucket(number)?;
            }
        }
        self.len -= removed;
        if removed > 0 {
            self.after_write()?;
        }
        Ok(removed)
    }

    /// Drop everything and start over from a single empty bucket
    pub fn clear(&mut self) -> Result<()> {
        self.global_depth = 0;
        self.directory = vec![0];
        self.buckets = vec![Bucket::new(0)];
        self.len = 0;
        self.bucket_file.set_len(0)?;
        self.write_all_files()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn global_depth(&self) -> u8 {
        self.global_depth
    }

    /// Buckets allocated, overflow links included
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Number of `(key, value)` pairs
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every stored pair, in bucket order
    pub fn entries(&self) -> Vec<(HashKey, i32)> {
        self.buckets.iter().flat_map(|b| b.entries.iter().copied()).collect()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.dir_file.sync_data()?;
        self.bucket_file.sync_data()?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn bucket_for(&self, hash: u32) -> usize {
        let mask = (1u32 << self.global_depth) - 1;
        self.directory[(hash & mask) as usize] as usize
    }

    /// A bucket followed by its overflow links
    fn chain(&self, first: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(first), move |&n| self.buckets[n].overflow.map(|o| o as usize))
    }

    /// Split a full bucket on its next hash bit, doubling the directory first
    /// when the bucket is already as deep as the directory
    fn split(&mut self, number: usize) -> Result<()> {
        let local = self.buckets[number].local_depth;
        if local == self.global_depth {
            self.directory.extend_from_within(..);
            self.global_depth += 1;
            tracing::debug!(
                "Hash index {} doubled directory to depth {}",
                self.dir_path.display(),
                self.global_depth
            );
        }

        let bit = 1u32 << local;
        let sibling = self.buckets.len();
        let entries = std::mem::take(&mut self.buckets[number].entries);
        let (moved, stay): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|&(k, _)| hash_of(k) & bit != 0);

        self.buckets[number].local_depth = local + 1;
        self.buckets[number].entries = stay;
        self.buckets.push(Bucket {
            local_depth: local + 1,
            entries: moved,
            overflow: None,
        });

        for (slot, target) in self.directory.iter_mut().enumerate() {
            if *target as usize == number && (slot as u32) & bit != 0 {
                *target = sibling as u32;
            }
        }

        tracing::debug!(
            "Hash index {} split bucket {} into {} at depth {}",
            self.dir_path.display(),
            number,
            sibling,
            local + 1
        );

        self.write_bucket(number)?;
        self.write_bucket(sibling)?;
        self.write_directory()
    }

    /// Append to the overflow chain of a full, maximally deep bucket
    fn push_overflow(&mut self, first: usize, key: HashKey, value: i32) -> Result<()> {
        let mut current = first;
        while let Some(next) = self.buckets[current].overflow {
            current = next as usize;
            if self.buckets[current].entries.len() < self.capacity {
                self.buckets[current].entries.push((key, value));
                return self.write_bucket(current);
            }
        }

        let link = self.buckets.len();
        let mut bucket = Bucket::new(self.buckets[first].local_depth);
        bucket.entries.push((key, value));
        self.buckets.push(bucket);
        self.buckets[current].overflow = Some(link as u32);

        tracing::debug!(
            "Hash index {} chained overflow bucket {} after {}",
            self.dir_path.display(),
            link,
            current
        );

        self.write_bucket(link)?;
        self.write_bucket(current)
    }

    fn write_bucket(&mut self, number: usize) -> Result<()> {
        let raw = self.buckets[number].encode(self.capacity);
        let offset = BUCKET_FILE_HEADER + (number * Bucket::encoded_size(self.capacity)) as u64;
        self.bucket_file.seek(SeekFrom::Start(offset))?;
        self.bucket_file.write_all(&raw)?;
        Ok(())
    }

    fn write_directory(&mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(1 + self.directory.len() * 4);
        buf.put_u8(self.global_depth);
        for &number in &self.directory {
            buf.put_u32(number);
        }
        self.dir_file.set_len(0)?;
        self.dir_file.seek(SeekFrom::Start(0))?;
        self.dir_file.write_all(&buf)?;
        Ok(())
    }

    fn write_all_files(&mut self) -> Result<()> {
        let mut header = BytesMut::with_capacity(BUCKET_FILE_HEADER as usize);
        header.put_u16(self.capacity as u16);
        header.put_u8(self.max_depth);
        self.bucket_file.seek(SeekFrom::Start(0))?;
        self.bucket_file.write_all(&header)?;
        for number in 0..self.buckets.len() {
            self.write_bucket(number)?;
        }
        self.write_directory()?;
        self.after_write()
    }

    /// Rebuild the in-memory structure from both files, checking every link
    fn load(&mut self, raw_buckets: &[u8], raw_dir: &[u8]) -> Result<()> {
        let corrupt = |msg: String| VaultError::Corruption(format!("{}: {}", self.dir_path.display(), msg));

        if raw_buckets.len() < BUCKET_FILE_HEADER as usize {
            return Err(corrupt("truncated bucket file header".to_string()));
        }
        let mut header = &raw_buckets[..BUCKET_FILE_HEADER as usize];
        let capacity = header.get_u16() as usize;
        let max_depth = header.get_u8();
        if capacity == 0 {
            return Err(corrupt("bucket capacity of zero".to_string()));
        }

        let size = Bucket::encoded_size(capacity);
        let body = &raw_buckets[BUCKET_FILE_HEADER as usize..];
        if body.is_empty() || body.len() % size != 0 {
            return Err(corrupt(format!("bucket area of {} bytes is not a multiple of {}", body.len(), size)));
        }
        let buckets = body
            .chunks(size)
            .enumerate()
            .map(|(number, raw)| Bucket::decode(raw, capacity, number))
            .collect::<Result<Vec<_>>>()?;

        let Some((&global_depth, mut dir_body)) = raw_dir.split_first() else {
            return Err(corrupt("empty directory file".to_string()));
        };
        if global_depth > max_depth.min(MAX_SUPPORTED_DEPTH) || dir_body.len() != (4usize << global_depth) {
            return Err(corrupt(format!(
                "directory of {} bytes does not match depth {}",
                dir_body.len(),
                global_depth
            )));
        }
        let mut directory = Vec::with_capacity(1 << global_depth);
        while dir_body.has_remaining() {
            let number = dir_body.get_u32();
            if number as usize >= buckets.len() {
                return Err(corrupt(format!("directory points at missing bucket {}", number)));
            }
            if buckets[number as usize].local_depth > global_depth {
                return Err(corrupt(format!("bucket {} is deeper than the directory", number)));
            }
            directory.push(number);
        }

        for (number, bucket) in buckets.iter().enumerate() {
            let mut hops = 0;
            let mut link = bucket.overflow;
            while let Some(next) = link {
                hops += 1;
                if next as usize >= buckets.len() || hops > buckets.len() {
                    return Err(corrupt(format!("broken overflow chain from bucket {}", number)));
                }
                link = buckets[next as usize].overflow;
            }
        }

        self.capacity = capacity;
        self.max_depth = max_depth;
        self.global_depth = global_depth;
        self.directory = directory;
        self.len = buckets.iter().map(|b| b.entries.len()).sum();
        self.buckets = buckets;
        Ok(())
    }

    fn after_write(&mut self) -> Result<()> {
        if self.sync_strategy == SyncStrategy::EveryWrite {
            self.sync()?;
        }
        Ok(())
    }
}

fn open_rw(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}
