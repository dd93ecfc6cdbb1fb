//! Hash bucket page
//!
//! Fixed-size on disk so buckets can be rewritten in place by number.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VaultError};

use super::HashKey;

/// Bucket prefix: LocalDepth (1) + Count (2) + Overflow (4)
const BUCKET_PREFIX: usize = 7;

/// Key (4) + Value (4)
const ENTRY_SIZE: usize = 8;

const NO_BUCKET: i32 = -1;

/// One bucket, or one link of an overflow chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Bucket {
    pub local_depth: u8,
    pub entries: Vec<(HashKey, i32)>,
    /// Next bucket in the overflow chain
    pub overflow: Option<u32>,
}

impl Bucket {
    pub fn new(local_depth: u8) -> Self {
        Self {
            local_depth,
            entries: Vec::new(),
            overflow: None,
        }
    }

    /// On-disk bytes per bucket for a given capacity
    pub fn encoded_size(capacity: usize) -> usize {
        BUCKET_PREFIX + capacity * ENTRY_SIZE
    }

    pub fn encode(&self, capacity: usize) -> BytesMut {
        let size = Self::encoded_size(capacity);
        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(self.local_depth);
        buf.put_u16(self.entries.len() as u16);
        buf.put_i32(self.overflow.map(|id| id as i32).unwrap_or(NO_BUCKET));
        for &(key, value) in &self.entries {
            buf.put_u32(key);
            buf.put_i32(value);
        }
        buf.put_bytes(0, size - buf.len());
        buf
    }

    pub fn decode(mut raw: &[u8], capacity: usize, number: usize) -> Result<Self> {
        if raw.len() != Self::encoded_size(capacity) {
            return Err(VaultError::Corruption(format!(
                "bucket {} is {} bytes, expected {}",
                number,
                raw.len(),
                Self::encoded_size(capacity)
            )));
        }

        let local_depth = raw.get_u8();
        let count = raw.get_u16() as usize;
        let overflow = raw.get_i32();
        if count > capacity {
            return Err(VaultError::Corruption(format!(
                "bucket {} claims {} entries, capacity is {}",
                number, count, capacity
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push((raw.get_u32(), raw.get_i32()));
        }

        let overflow = match overflow {
            NO_BUCKET => None,
            id if id >= 0 => Some(id as u32),
            id => {
                return Err(VaultError::Corruption(format!(
                    "bucket {} has invalid overflow link {}",
                    number, id
                )))
            }
        };

        Ok(Self {
            local_depth,
            entries,
            overflow,
        })
    }
}
