//! Tree Index (B+-tree)
//!
//! Maps a unique composite key to exactly one record id. Nodes live in an
//! arena addressed by page number and are written through to a paged file
//! after every mutation.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ Header (30 bytes)                                                   │
//! │ Magic "PVBT" (4) | Version (2) | Order (2) | KeyLen (2)             │
//! │ Root (4) | FirstLeaf (4) | NodeCount (4) | EntryCount (8)           │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │ Page 0: [Kind (1)][KeyCount (2)][Keys × (order-1)]                  │
//! │         [Slots u32 × order][Next i32 (4)]                           │
//! │ Page 1: ...                                                         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//! Leaf slots hold record ids; internal slots hold child page numbers.
//!
//! ## Shape
//! Order `m`: a node holds at most `m - 1` keys. A leaf that reaches `m`
//! keys splits with `floor(m/2)` keys staying left, and the first right key
//! is copied into the parent. An internal node that reaches `m` keys moves
//! its median up. The tree only grows taller at the root.
//!
//! Deletion removes the leaf entry and leaves under-full nodes in place;
//! separators are never rewritten, which keeps descent correct.

mod node;

pub use node::{Node, NodeId, TreeKey};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};

use crate::config::SyncStrategy;
use crate::error::{Result, VaultError};

const MAGIC: &[u8; 4] = b"PVBT";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 30;

/// Smallest order that still splits into two non-empty halves
pub const MIN_ORDER: usize = 3;

/// B+-tree over fixed-width keys, one file per index
pub struct TreeIndex<K: TreeKey> {
    path: PathBuf,
    file: File,
    order: usize,
    root: NodeId,
    first_leaf: NodeId,
    nodes: Vec<Node<K>>,
    entry_count: u64,
    sync_strategy: SyncStrategy,
}

impl<K: TreeKey> TreeIndex<K> {
    /// Open or create `<base>.bpt`
    ///
    /// An existing file keeps the order it was created with.
    pub fn open(base: &Path, order: usize, sync_strategy: SyncStrategy) -> Result<Self> {
        if order < MIN_ORDER || order > u16::MAX as usize {
            return Err(VaultError::Config(format!("tree order {} out of range", order)));
        }

        let path = base.with_extension("bpt");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let mut tree = Self {
            path,
            file,
            order,
            root: 0,
            first_leaf: 0,
            nodes: vec![Node::empty_leaf()],
            entry_count: 0,
            sync_strategy,
        };

        if raw.is_empty() {
            tree.write_node(0)?;
            tree.write_header()?;
            tree.after_write()?;
            return Ok(tree);
        }

        tree.load(&raw)?;
        if tree.order != order {
            tracing::warn!(
                "Tree index {} keeps stored order {} over configured {}",
                tree.path.display(),
                tree.order,
                order
            );
        }
        tracing::trace!(
            "Loaded tree index {} ({} nodes, {} entries)",
            tree.path.display(),
            tree.nodes.len(),
            tree.entry_count
        );
        Ok(tree)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Record id stored under `key`
    pub fn lookup(&self, key: &K) -> Option<i32> {
        match &self.nodes[self.find_leaf(key) as usize] {
            Node::Leaf { keys, values, .. } => keys.binary_search(key).ok().map(|pos| values[pos]),
            Node::Internal { .. } => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_some()
    }

    /// Entries with `lo <= key <= hi`, ascending, following leaf links
    pub fn range(&self, lo: &K, hi: &K) -> Vec<(K, i32)> {
        if lo > hi {
            return Vec::new();
        }
        TreeIter {
            tree: self,
            leaf: Some(self.find_leaf(lo)),
            pos: 0,
        }
        .skip_while(|(k, _)| k < lo)
        .take_while(|(k, _)| k <= hi)
        .collect()
    }

    /// Every entry in ascending key order
    pub fn iter(&self) -> TreeIter<'_, K> {
        TreeIter {
            tree: self,
            leaf: Some(self.first_leaf),
            pos: 0,
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Store `id` under `key`; returns false if the key is already present
    pub fn insert(&mut self, key: K, id: i32) -> Result<bool> {
        let (leaf_id, path) = self.find_leaf_with_path(&key);

        let overflow = match &mut self.nodes[leaf_id as usize] {
            Node::Leaf { keys, values, .. } => match keys.binary_search(&key) {
                Ok(_) => return Ok(false),
                Err(pos) => {
                    keys.insert(pos, key);
                    values.insert(pos, id);
                    keys.len() >= self.order
                }
            },
            Node::Internal { .. } => return Err(self.lost_leaf(leaf_id)),
        };

        if overflow {
            self.split_leaf(leaf_id, path)?;
        } else {
            self.write_node(leaf_id)?;
        }

        self.entry_count += 1;
        self.write_header()?;
        self.after_write()?;
        Ok(true)
    }

    /// Remove `key`; returns the id it held
    pub fn delete(&mut self, key: &K) -> Result<Option<i32>> {
        let leaf_id = self.find_leaf(key);
        let removed = match &mut self.nodes[leaf_id as usize] {
            Node::Leaf { keys, values, .. } => match keys.binary_search(key) {
                Ok(pos) => {
                    keys.remove(pos);
                    Some(values.remove(pos))
                }
                Err(_) => None,
            },
            Node::Internal { .. } => return Err(self.lost_leaf(leaf_id)),
        };

        if removed.is_some() {
            self.entry_count -= 1;
            self.write_node(leaf_id)?;
            self.write_header()?;
            self.after_write()?;
        }
        Ok(removed)
    }

    /// Drop every entry and shrink back to a single empty leaf
    pub fn clear(&mut self) -> Result<()> {
        self.nodes = vec![Node::empty_leaf()];
        self.root = 0;
        self.first_leaf = 0;
        self.entry_count = 0;
        self.file.set_len(0)?;
        self.write_node(0)?;
        self.write_header()?;
        self.after_write()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Levels from root to leaf; a lone leaf is height 1
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut current = self.root;
        while let Node::Internal { children, .. } = &self.nodes[current as usize] {
            current = children[0];
            height += 1;
        }
        height
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.entry_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn find_leaf(&self, key: &K) -> NodeId {
        let mut current = self.root;
        while let Node::Internal { keys, children } = &self.nodes[current as usize] {
            current = children[keys.partition_point(|k| k <= key)];
        }
        current
    }

    /// Leaf for `key` plus the `(node, child index)` steps taken to reach it
    fn find_leaf_with_path(&self, key: &K) -> (NodeId, Vec<(NodeId, usize)>) {
        let mut current = self.root;
        let mut path = Vec::new();
        while let Node::Internal { keys, children } = &self.nodes[current as usize] {
            let idx = keys.partition_point(|k| k <= key);
            path.push((current, idx));
            current = children[idx];
        }
        (current, path)
    }

    fn split_leaf(&mut self, leaf_id: NodeId, path: Vec<(NodeId, usize)>) -> Result<()> {
        let right_id = self.nodes.len() as NodeId;
        let mid = self.order / 2;

        let right = match &mut self.nodes[leaf_id as usize] {
            Node::Leaf { keys, values, next } => Node::Leaf {
                keys: keys.split_off(mid),
                values: values.split_off(mid),
                next: next.replace(right_id),
            },
            Node::Internal { .. } => return Err(self.lost_leaf(leaf_id)),
        };
        let separator = match &right {
            Node::Leaf { keys, .. } => keys[0],
            Node::Internal { keys, .. } => keys[0],
        };
        self.nodes.push(right);

        tracing::trace!("Tree index split leaf {} into {}", leaf_id, right_id);
        self.write_node(leaf_id)?;
        self.write_node(right_id)?;
        self.insert_into_parent(path, leaf_id, separator, right_id)
    }

    /// Hook a freshly split right sibling into the parent named by `path`
    fn insert_into_parent(
        &mut self,
        mut path: Vec<(NodeId, usize)>,
        left_id: NodeId,
        separator: K,
        right_id: NodeId,
    ) -> Result<()> {
        let Some((parent_id, child_idx)) = path.pop() else {
            let new_root = self.nodes.len() as NodeId;
            self.nodes.push(Node::Internal {
                keys: vec![separator],
                children: vec![left_id, right_id],
            });
            self.root = new_root;
            tracing::debug!(
                "Tree index {} grew a new root {} (height {})",
                self.path.display(),
                new_root,
                self.height()
            );
            return self.write_node(new_root);
        };

        let overflow = match &mut self.nodes[parent_id as usize] {
            Node::Internal { keys, children } => {
                keys.insert(child_idx, separator);
                children.insert(child_idx + 1, right_id);
                keys.len() >= self.order
            }
            Node::Leaf { .. } => {
                return Err(VaultError::Corruption(format!(
                    "tree node {} on a descent path is a leaf",
                    parent_id
                )))
            }
        };

        if overflow {
            self.split_internal(parent_id, path)
        } else {
            self.write_node(parent_id)
        }
    }

    fn split_internal(&mut self, node_id: NodeId, path: Vec<(NodeId, usize)>) -> Result<()> {
        let right_id = self.nodes.len() as NodeId;
        let mid = self.order / 2;

        let (median, right) = match &mut self.nodes[node_id as usize] {
            Node::Internal { keys, children } => {
                let right_keys = keys.split_off(mid + 1);
                let right_children = children.split_off(mid + 1);
                let median = keys.pop();
                (
                    median,
                    Node::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                )
            }
            Node::Leaf { .. } => (None, Node::empty_leaf()),
        };
        let Some(median) = median else {
            return Err(VaultError::Corruption(format!(
                "tree node {} cannot be split as an internal node",
                node_id
            )));
        };
        self.nodes.push(right);

        tracing::trace!("Tree index split internal node {} into {}", node_id, right_id);
        self.write_node(node_id)?;
        self.write_node(right_id)?;
        self.insert_into_parent(path, node_id, median, right_id)
    }

    fn lost_leaf(&self, id: NodeId) -> VaultError {
        VaultError::Corruption(format!(
            "tree index {}: descent ended at internal node {}",
            self.path.display(),
            id
        ))
    }

    fn page_offset(&self, id: NodeId) -> u64 {
        (HEADER_SIZE + id as usize * Node::<K>::page_size(self.order)) as u64
    }

    fn write_node(&mut self, id: NodeId) -> Result<()> {
        let raw = self.nodes[id as usize].encode(self.order);
        let offset = self.page_offset(id);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&raw)?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u16(VERSION);
        buf.put_u16(self.order as u16);
        buf.put_u16(K::ENCODED_LEN as u16);
        buf.put_u32(self.root);
        buf.put_u32(self.first_leaf);
        buf.put_u32(self.nodes.len() as u32);
        buf.put_u64(self.entry_count);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn load(&mut self, raw: &[u8]) -> Result<()> {
        let corrupt = |msg: String| VaultError::Corruption(format!("{}: {}", self.path.display(), msg));

        if raw.len() < HEADER_SIZE {
            return Err(corrupt("truncated header".to_string()));
        }
        let mut header = &raw[..HEADER_SIZE];
        if &header[..4] != MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        header.advance(4);

        let version = header.get_u16();
        let order = header.get_u16() as usize;
        let key_len = header.get_u16() as usize;
        let root = header.get_u32();
        let first_leaf = header.get_u32();
        let node_count = header.get_u32();
        let entry_count = header.get_u64();

        if version != VERSION {
            return Err(corrupt(format!("unsupported version {}", version)));
        }
        if key_len != K::ENCODED_LEN {
            return Err(corrupt(format!("key width {} does not match {}", key_len, K::ENCODED_LEN)));
        }
        if order < MIN_ORDER {
            return Err(corrupt(format!("order {} too small", order)));
        }
        if root >= node_count || first_leaf >= node_count {
            return Err(corrupt("root or first leaf out of bounds".to_string()));
        }

        let page_size = Node::<K>::page_size(order);
        let body = &raw[HEADER_SIZE..];
        if body.len() != node_count as usize * page_size {
            return Err(corrupt(format!(
                "{} page bytes for {} nodes of {} bytes",
                body.len(),
                node_count,
                page_size
            )));
        }

        let nodes = body
            .chunks(page_size)
            .enumerate()
            .map(|(id, page)| Node::decode(page, order, id as NodeId, node_count))
            .collect::<Result<Vec<_>>>()?;

        let stored: usize = nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.key_count())
            .sum();
        if stored as u64 != entry_count {
            return Err(corrupt(format!(
                "header counts {} entries, leaves hold {}",
                entry_count, stored
            )));
        }
        if !nodes[first_leaf as usize].is_leaf() {
            return Err(corrupt("first leaf is an internal node".to_string()));
        }

        // Every node must hang off exactly one parent, or descent could loop
        let mut seen = vec![false; nodes.len()];
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            if std::mem::replace(&mut seen[id as usize], true) {
                return Err(corrupt(format!("node {} is reachable twice", id)));
            }
            if let Node::Internal { children, .. } = &nodes[id as usize] {
                pending.extend(children);
            }
        }

        // The leaf chain must end, and only through leaves
        let mut linked = vec![false; nodes.len()];
        let mut cursor = Some(first_leaf);
        while let Some(id) = cursor {
            if std::mem::replace(&mut linked[id as usize], true) {
                return Err(corrupt(format!("leaf chain revisits node {}", id)));
            }
            cursor = match &nodes[id as usize] {
                Node::Leaf { next, .. } => *next,
                Node::Internal { .. } => {
                    return Err(corrupt(format!("leaf chain reaches internal node {}", id)));
                }
            };
        }

        self.order = order;
        self.root = root;
        self.first_leaf = first_leaf;
        self.nodes = nodes;
        self.entry_count = entry_count;
        Ok(())
    }

    fn after_write(&mut self) -> Result<()> {
        if self.sync_strategy == SyncStrategy::EveryWrite {
            self.sync()?;
        }
        Ok(())
    }
}

/// In-order walk over the leaf chain
pub struct TreeIter<'a, K: TreeKey> {
    tree: &'a TreeIndex<K>,
    leaf: Option<NodeId>,
    pos: usize,
}

impl<K: TreeKey> Iterator for TreeIter<'_, K> {
    type Item = (K, i32);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf_id = self.leaf?;
            let Node::Leaf { keys, values, next } = &self.tree.nodes[leaf_id as usize] else {
                self.leaf = None;
                return None;
            };

            if self.pos < keys.len() {
                let item = (keys[self.pos], values[self.pos]);
                self.pos += 1;
                return Some(item);
            }

            self.leaf = *next;
            self.pos = 0;
        }
    }
}
