//! Tests for TreeIndex
//!
//! These tests verify:
//! - Point lookups and duplicate-key rejection
//! - Leaf and internal splits growing the tree from the root
//! - Ordered iteration and inclusive range scans over the leaf chain
//! - Deletes that leave the tree searchable
//! - Persistence across reopen and corruption detection

use std::path::PathBuf;

use petvault::config::SyncStrategy;
use petvault::index::{TreeIndex, TreeKey};
use petvault::VaultError;
use tempfile::TempDir;

type PairTree = TreeIndex<(i32, i32)>;
type BookingTree = TreeIndex<(i32, i32, i32)>;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_tree() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("bookings_key");
    (temp_dir, base)
}

fn open_pairs(base: &PathBuf, order: usize) -> PairTree {
    TreeIndex::open(base, order, SyncStrategy::OnClose).unwrap()
}

/// Deterministic shuffle of 1..=n
fn scrambled(n: i32) -> Vec<i32> {
    let mut keys: Vec<i32> = (1..=n).collect();
    let mut state = 0x2545_f491_u32;
    for i in (1..keys.len()).rev() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        keys.swap(i, state as usize % (i + 1));
    }
    keys
}

fn assert_strictly_ascending<K: TreeKey>(tree: &TreeIndex<K>) {
    let keys: Vec<K> = tree.iter().map(|(k, _)| k).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "iteration out of order");
    assert_eq!(keys.len(), tree.len());
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_new_tree_is_single_empty_leaf() {
    let (_temp, base) = setup_temp_tree();
    let tree = open_pairs(&base, 4);

    assert!(base.with_extension("bpt").exists());
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.lookup(&(1, 1)), None);
    assert_eq!(tree.iter().count(), 0);
}

#[test]
fn test_insert_and_lookup() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 4);

    assert!(tree.insert((2, 1), 20).unwrap());
    assert!(tree.insert((1, 9), 10).unwrap());

    assert_eq!(tree.lookup(&(1, 9)), Some(10));
    assert_eq!(tree.lookup(&(2, 1)), Some(20));
    assert!(!tree.contains(&(2, 2)));
}

#[test]
fn test_duplicate_key_rejected() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 4);

    assert!(tree.insert((1, 1), 10).unwrap());
    assert!(!tree.insert((1, 1), 99).unwrap());

    assert_eq!(tree.lookup(&(1, 1)), Some(10));
    assert_eq!(tree.len(), 1);
}

#[test]
fn test_order_below_minimum_is_config_error() {
    let (_temp, base) = setup_temp_tree();
    let result = PairTree::open(&base, 2, SyncStrategy::OnClose);
    assert!(matches!(result, Err(VaultError::Config(_))));
}

// =============================================================================
// Splits
// =============================================================================

#[test]
fn test_leaf_split_at_order() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 4);

    for id in 1..=3 {
        tree.insert((id, 0), id).unwrap();
    }
    assert_eq!(tree.height(), 1);

    tree.insert((4, 0), 4).unwrap();
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.node_count(), 3);
    for id in 1..=4 {
        assert_eq!(tree.lookup(&(id, 0)), Some(id));
    }
}

#[test]
fn test_repeated_splits_grow_height() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 3);

    for id in scrambled(300) {
        assert!(tree.insert((id, -id), id).unwrap());
    }

    assert!(tree.height() >= 3, "height {}", tree.height());
    assert_eq!(tree.len(), 300);
    for id in 1..=300 {
        assert_eq!(tree.lookup(&(id, -id)), Some(id), "key {}", id);
    }
    assert_strictly_ascending(&tree);
}

#[test]
fn test_ascending_and_descending_inserts() {
    for order in [3, 4, 5, 8] {
        let (_temp, base) = setup_temp_tree();
        let mut tree = open_pairs(&base, order);

        for id in 1..=100 {
            tree.insert((id, 0), id).unwrap();
        }
        for id in (101..=200).rev() {
            tree.insert((id, 0), id).unwrap();
        }

        let ids: Vec<i32> = tree.iter().map(|(_, v)| v).collect();
        assert_eq!(ids, (1..=200).collect::<Vec<_>>(), "order {}", order);
    }
}

// =============================================================================
// Range Scans
// =============================================================================

#[test]
fn test_range_is_inclusive() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 4);
    for id in 1..=50 {
        tree.insert((id, 0), id).unwrap();
    }

    let hits: Vec<i32> = tree.range(&(10, 0), &(20, 0)).into_iter().map(|(_, v)| v).collect();
    assert_eq!(hits, (10..=20).collect::<Vec<_>>());
}

#[test]
fn test_range_over_key_prefix() {
    let (_temp, base) = setup_temp_tree();
    let mut tree: BookingTree = TreeIndex::open(&base, 4, SyncStrategy::OnClose).unwrap();

    // (pet, service, day)
    let mut id = 0;
    for pet in 1..=5 {
        for service in 1..=3 {
            for day in [730_000, 730_007, 730_014] {
                id += 1;
                tree.insert((pet, service, day), id).unwrap();
            }
        }
    }

    let pet_three = tree.range(&(3, i32::MIN, i32::MIN), &(3, i32::MAX, i32::MAX));
    assert_eq!(pet_three.len(), 9);
    assert!(pet_three.iter().all(|((pet, _, _), _)| *pet == 3));
    assert!(pet_three.windows(2).all(|w| w[0].0 < w[1].0));

    let everything = tree.range(&<(i32, i32, i32)>::MIN, &<(i32, i32, i32)>::MAX);
    assert_eq!(everything.len(), 45);
}

#[test]
fn test_range_empty_cases() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 4);
    for id in 1..=10 {
        tree.insert((id * 10, 0), id).unwrap();
    }

    assert!(tree.range(&(11, 0), &(19, 0)).is_empty());
    assert!(tree.range(&(500, 0), &(900, 0)).is_empty());
    assert!(tree.range(&(50, 0), &(10, 0)).is_empty());
}

// =============================================================================
// Deletes
// =============================================================================

#[test]
fn test_delete_returns_stored_id() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 4);
    for id in 1..=40 {
        tree.insert((id, 0), id * 2).unwrap();
    }

    assert_eq!(tree.delete(&(7, 0)).unwrap(), Some(14));
    assert_eq!(tree.delete(&(7, 0)).unwrap(), None);
    assert_eq!(tree.lookup(&(7, 0)), None);
    assert_eq!(tree.len(), 39);
}

#[test]
fn test_tree_stays_searchable_after_heavy_deletes() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 3);
    for id in scrambled(120) {
        tree.insert((id, 0), id).unwrap();
    }

    for id in (1..=120).filter(|id| id % 3 != 0) {
        assert_eq!(tree.delete(&(id, 0)).unwrap(), Some(id));
    }

    let left: Vec<i32> = tree.iter().map(|(_, v)| v).collect();
    assert_eq!(left, (3..=120).step_by(3).collect::<Vec<_>>());

    // Re-inserting deleted keys lands them back in order
    for id in [1, 2, 119] {
        assert!(tree.insert((id, 0), id).unwrap());
    }
    assert_strictly_ascending(&tree);
    assert_eq!(tree.lookup(&(119, 0)), Some(119));
}

#[test]
fn test_clear_resets_tree() {
    let (_temp, base) = setup_temp_tree();
    let mut tree = open_pairs(&base, 3);
    for id in 1..=30 {
        tree.insert((id, 0), id).unwrap();
    }

    tree.clear().unwrap();

    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.node_count(), 1);
    assert!(tree.insert((1, 0), 1).unwrap());
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_tree_survives_reopen() {
    let (_temp, base) = setup_temp_tree();
    let height = {
        let mut tree = open_pairs(&base, 4);
        for id in scrambled(200) {
            tree.insert((id % 17, id), id).unwrap();
        }
        tree.delete(&(5, 5)).unwrap();
        tree.sync().unwrap();
        tree.height()
    };

    let tree = open_pairs(&base, 4);
    assert_eq!(tree.height(), height);
    assert_eq!(tree.len(), 199);
    assert_eq!(tree.lookup(&(5, 5)), None);
    assert_eq!(tree.lookup(&(3, 20)), Some(20));
    assert_strictly_ascending(&tree);
}

#[test]
fn test_stored_order_wins_on_reopen() {
    let (_temp, base) = setup_temp_tree();
    {
        let mut tree = open_pairs(&base, 3);
        tree.insert((1, 1), 1).unwrap();
    }

    let tree = open_pairs(&base, 9);
    assert_eq!(tree.order(), 3);
    assert_eq!(tree.lookup(&(1, 1)), Some(1));
}

#[test]
fn test_key_width_mismatch_is_corruption() {
    let (_temp, base) = setup_temp_tree();
    {
        open_pairs(&base, 4);
    }

    let result = BookingTree::open(&base, 4, SyncStrategy::OnClose);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}

#[test]
fn test_bad_magic_is_corruption() {
    let (_temp, base) = setup_temp_tree();
    {
        let mut tree = open_pairs(&base, 4);
        tree.insert((1, 1), 1).unwrap();
    }

    let path = base.with_extension("bpt");
    let mut raw = std::fs::read(&path).unwrap();
    raw[0] = b'X';
    std::fs::write(&path, raw).unwrap();

    let result = PairTree::open(&base, 4, SyncStrategy::OnClose);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}

#[test]
fn test_truncated_pages_are_corruption() {
    let (_temp, base) = setup_temp_tree();
    {
        let mut tree = open_pairs(&base, 4);
        for id in 1..=20 {
            tree.insert((id, 0), id).unwrap();
        }
    }

    let path = base.with_extension("bpt");
    let raw = std::fs::read(&path).unwrap();
    std::fs::write(&path, &raw[..raw.len() - 5]).unwrap();

    let result = PairTree::open(&base, 4, SyncStrategy::OnClose);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}

/// Offset of the sibling link inside node page `id` of a pair tree
fn next_link_offset(order: usize, id: usize) -> usize {
    let page = 3 + (order - 1) * 8 + order * 4 + 4;
    30 + id * page + page - 4
}

#[test]
fn test_leaf_linked_to_itself_is_corruption() {
    let (_temp, base) = setup_temp_tree();
    {
        let mut tree = open_pairs(&base, 5);
        tree.insert((1, 1), 1).unwrap();
    }

    let path = base.with_extension("bpt");
    let mut raw = std::fs::read(&path).unwrap();
    let at = next_link_offset(5, 0);
    raw[at..at + 4].copy_from_slice(&0i32.to_be_bytes());
    std::fs::write(&path, raw).unwrap();

    let result = PairTree::open(&base, 5, SyncStrategy::OnClose);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}

#[test]
fn test_last_leaf_linked_back_to_first_is_corruption() {
    let (_temp, base) = setup_temp_tree();
    {
        let mut tree = open_pairs(&base, 4);
        for id in 1..=20 {
            tree.insert((id, 0), id).unwrap();
        }
        assert!(tree.height() > 1);
    }

    let path = base.with_extension("bpt");
    let mut raw = std::fs::read(&path).unwrap();
    let first_leaf = u32::from_be_bytes(raw[14..18].try_into().unwrap()) as i32;
    let page = next_link_offset(4, 1) - next_link_offset(4, 0);
    let node_count = (raw.len() - 30) / page;

    // The tail of the chain is the only leaf whose link is empty
    let mut patched = 0;
    for id in 0..node_count {
        let kind = raw[30 + id * page];
        let at = next_link_offset(4, id);
        let next = i32::from_be_bytes(raw[at..at + 4].try_into().unwrap());
        if kind == 0 && next == -1 {
            raw[at..at + 4].copy_from_slice(&first_leaf.to_be_bytes());
            patched += 1;
        }
    }
    assert_eq!(patched, 1);
    std::fs::write(&path, raw).unwrap();

    let result = PairTree::open(&base, 4, SyncStrategy::OnClose);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}
