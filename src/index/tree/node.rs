//! B+-tree node pages and key encoding

use std::fmt::Debug;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VaultError};

/// Node identifier (page number in the tree file)
pub type NodeId = u32;

const KIND_LEAF: u8 = 0;
const KIND_INTERNAL: u8 = 1;

/// Sentinel for "no right sibling"
const NO_NODE: i32 = -1;

/// Fixed-width, totally ordered composite key
///
/// Ordering is the tuple's own lexicographic order; the byte encoding only
/// needs to round-trip.
pub trait TreeKey: Ord + Copy + Debug {
    /// Bytes per encoded key
    const ENCODED_LEN: usize;

    /// Smallest representable key, for open-ended ranges
    const MIN: Self;

    /// Largest representable key, for open-ended ranges
    const MAX: Self;

    fn encode(&self, buf: &mut BytesMut);

    fn decode(buf: &mut &[u8]) -> Self;
}

impl TreeKey for (i32, i32) {
    const ENCODED_LEN: usize = 8;
    const MIN: Self = (i32::MIN, i32::MIN);
    const MAX: Self = (i32::MAX, i32::MAX);

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.0);
        buf.put_i32(self.1);
    }

    fn decode(buf: &mut &[u8]) -> Self {
        (buf.get_i32(), buf.get_i32())
    }
}

impl TreeKey for (i32, i32, i32) {
    const ENCODED_LEN: usize = 12;
    const MIN: Self = (i32::MIN, i32::MIN, i32::MIN);
    const MAX: Self = (i32::MAX, i32::MAX, i32::MAX);

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.0);
        buf.put_i32(self.1);
        buf.put_i32(self.2);
    }

    fn decode(buf: &mut &[u8]) -> Self {
        (buf.get_i32(), buf.get_i32(), buf.get_i32())
    }
}

/// One tree node
///
/// Internal nodes keep `children.len() == keys.len() + 1`; every key in
/// `children[i]` is `>= keys[i - 1]` and `< keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<K> {
    Leaf {
        keys: Vec<K>,
        values: Vec<i32>,
        /// Right sibling for ordered scans
        next: Option<NodeId>,
    },
    Internal {
        keys: Vec<K>,
        children: Vec<NodeId>,
    },
}

impl<K: TreeKey> Node<K> {
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
            next: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn key_count(&self) -> usize {
        match self {
            Node::Leaf { keys, .. } | Node::Internal { keys, .. } => keys.len(),
        }
    }

    /// Page size for a given order: Kind (1) + KeyCount (2) + keys + slots + Next (4)
    pub fn page_size(order: usize) -> usize {
        3 + (order - 1) * K::ENCODED_LEN + order * 4 + 4
    }

    pub fn encode(&self, order: usize) -> BytesMut {
        let size = Self::page_size(order);
        let mut buf = BytesMut::with_capacity(size);

        let (kind, keys, slots, next): (u8, &[K], Vec<u32>, i32) = match self {
            Node::Leaf { keys, values, next } => (
                KIND_LEAF,
                keys,
                values.iter().map(|&v| v as u32).collect(),
                next.map(|n| n as i32).unwrap_or(NO_NODE),
            ),
            Node::Internal { keys, children } => (KIND_INTERNAL, keys, children.clone(), NO_NODE),
        };

        buf.put_u8(kind);
        buf.put_u16(keys.len() as u16);
        for key in keys {
            key.encode(&mut buf);
        }
        buf.put_bytes(0, (order - 1 - keys.len()) * K::ENCODED_LEN);
        for &slot in &slots {
            buf.put_u32(slot);
        }
        buf.put_bytes(0, (order - slots.len()) * 4);
        buf.put_i32(next);
        buf
    }

    /// Decode one page; `node_count` bounds every child and sibling link
    pub fn decode(mut raw: &[u8], order: usize, id: NodeId, node_count: u32) -> Result<Self> {
        let corrupt = |msg: String| VaultError::Corruption(format!("tree node {}: {}", id, msg));

        if raw.len() != Self::page_size(order) {
            return Err(corrupt(format!("page is {} bytes", raw.len())));
        }

        let kind = raw.get_u8();
        let count = raw.get_u16() as usize;
        if count > order - 1 {
            return Err(corrupt(format!("{} keys exceed order {}", count, order)));
        }

        let keys: Vec<K> = (0..count).map(|_| K::decode(&mut raw)).collect();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt("keys out of order".to_string()));
        }
        raw.advance((order - 1 - count) * K::ENCODED_LEN);

        let slots: Vec<u32> = (0..order).map(|_| raw.get_u32()).collect();
        let next = raw.get_i32();

        match kind {
            KIND_LEAF => {
                let next = match next {
                    NO_NODE => None,
                    n if n >= 0 && (n as u32) < node_count => Some(n as u32),
                    n => return Err(corrupt(format!("sibling link {} out of bounds", n))),
                };
                Ok(Node::Leaf {
                    keys,
                    values: slots[..count].iter().map(|&v| v as i32).collect(),
                    next,
                })
            }
            KIND_INTERNAL => {
                let children = slots[..count + 1].to_vec();
                if let Some(bad) = children.iter().find(|&&c| c >= node_count || c == id) {
                    return Err(corrupt(format!("child link {} out of bounds", bad)));
                }
                Ok(Node::Internal { keys, children })
            }
            other => Err(corrupt(format!("unknown node kind {}", other))),
        }
    }
}
