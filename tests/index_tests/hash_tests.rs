//! Tests for HashIndex
//!
//! These tests verify:
//! - Multi-valued lookups under one grouping key
//! - Directory doubling and bucket splits as buckets fill
//! - Overflow chaining once a bucket reaches the maximum depth
//! - Deletes, clears and persistence across reopen
//! - Corruption detection on damaged index files

use std::path::PathBuf;

use petvault::config::SyncStrategy;
use petvault::index::hash::{id_key, text_key};
use petvault::index::{HashIndex, HashSettings};
use petvault::VaultError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_index() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("pets_owner");
    (temp_dir, base)
}

fn settings(capacity: usize, max_depth: u8) -> HashSettings {
    HashSettings { capacity, max_depth }
}

fn open(base: &PathBuf, capacity: usize, max_depth: u8) -> HashIndex {
    HashIndex::open(base, settings(capacity, max_depth), SyncStrategy::OnClose).unwrap()
}

fn sorted(mut values: Vec<i32>) -> Vec<i32> {
    values.sort_unstable();
    values
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_new_index_creates_both_files() {
    let (_temp, base) = setup_temp_index();
    let index = open(&base, 4, 8);

    assert!(base.with_extension("hdir").exists());
    assert!(base.with_extension("hbkt").exists());
    assert_eq!(index.global_depth(), 0);
    assert_eq!(index.bucket_count(), 1);
    assert!(index.is_empty());
}

#[test]
fn test_lookup_returns_every_value_for_key() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 4, 8);

    index.insert(id_key(1), 10).unwrap();
    index.insert(id_key(2), 20).unwrap();
    index.insert(id_key(1), 11).unwrap();

    assert_eq!(sorted(index.lookup(id_key(1))), vec![10, 11]);
    assert_eq!(index.lookup(id_key(2)), vec![20]);
    assert!(index.lookup(id_key(3)).is_empty());
}

#[test]
fn test_duplicate_pair_not_stored_twice() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 4, 8);

    assert!(index.insert(id_key(1), 10).unwrap());
    assert!(!index.insert(id_key(1), 10).unwrap());

    assert_eq!(index.len(), 1);
}

// =============================================================================
// Growth
// =============================================================================

#[test]
fn test_single_key_with_fifty_values() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 4, 8);

    for id in 1..=50 {
        index.insert(id_key(7), id).unwrap();
    }

    // ceil(log2(50 / 4)) = 4
    assert!(index.global_depth() >= 4, "depth {}", index.global_depth());
    assert_eq!(sorted(index.lookup(id_key(7))), (1..=50).collect::<Vec<_>>());
    assert_eq!(index.len(), 50);
}

#[test]
fn test_distinct_keys_split_buckets() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 4, 12);

    for id in 1..=200 {
        index.insert(id_key(id), id * 10).unwrap();
    }

    assert!(index.global_depth() >= 6);
    assert!(index.bucket_count() >= 200 / 4);
    for id in 1..=200 {
        assert_eq!(index.lookup(id_key(id)), vec![id * 10], "key {}", id);
    }
}

#[test]
fn test_depth_grows_only_as_needed() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 4, 8);

    for id in 1..=4 {
        index.insert(id_key(id), id).unwrap();
    }
    assert_eq!(index.global_depth(), 0);

    index.insert(id_key(5), 5).unwrap();
    assert!(index.global_depth() >= 1);
}

#[test]
fn test_depth_never_exceeds_maximum() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 2, 3);

    for id in 1..=100 {
        index.insert(text_key("tabby"), id).unwrap();
    }

    assert_eq!(index.global_depth(), 3);
    assert_eq!(index.lookup(text_key("tabby")).len(), 100);
}

// =============================================================================
// Deletes
// =============================================================================

#[test]
fn test_delete_removes_only_one_pair() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 4, 8);
    for id in 1..=20 {
        index.insert(id_key(id % 3), id).unwrap();
    }

    assert!(index.delete(id_key(1), 4).unwrap());
    assert!(!index.delete(id_key(1), 4).unwrap());
    assert!(!index.delete(id_key(2), 4).unwrap());

    assert!(!index.lookup(id_key(1)).contains(&4));
    assert_eq!(index.lookup(id_key(1)).len(), 6);
    assert_eq!(index.len(), 19);
}

#[test]
fn test_delete_from_overflow_chain() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 2, 2);
    for id in 1..=30 {
        index.insert(id_key(9), id).unwrap();
    }

    for id in (2..=30).step_by(2) {
        assert!(index.delete(id_key(9), id).unwrap());
    }

    let expected: Vec<i32> = (1..=30).step_by(2).collect();
    assert_eq!(sorted(index.lookup(id_key(9))), expected);
}

#[test]
fn test_delete_all_and_clear() {
    let (_temp, base) = setup_temp_index();
    let mut index = open(&base, 4, 8);
    for id in 1..=30 {
        index.insert(id_key(id % 2), id).unwrap();
    }

    assert_eq!(index.delete_all(id_key(0)).unwrap(), 15);
    assert!(index.lookup(id_key(0)).is_empty());
    assert_eq!(index.len(), 15);

    index.clear().unwrap();
    assert!(index.is_empty());
    assert_eq!(index.global_depth(), 0);
    assert!(index.lookup(id_key(1)).is_empty());
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_index_survives_reopen() {
    let (_temp, base) = setup_temp_index();
    let depth = {
        let mut index = open(&base, 4, 8);
        for id in 1..=60 {
            index.insert(id_key(id % 5), id).unwrap();
        }
        index.delete(id_key(0), 5).unwrap();
        index.sync().unwrap();
        index.global_depth()
    };

    let index = open(&base, 4, 8);
    assert_eq!(index.global_depth(), depth);
    assert_eq!(index.len(), 59);
    for key in 0..5 {
        let values = index.lookup(id_key(key));
        assert!(values.iter().all(|v| v % 5 == key));
    }
    assert!(!index.lookup(id_key(0)).contains(&5));
}

#[test]
fn test_cleared_index_survives_reopen() {
    let (_temp, base) = setup_temp_index();
    {
        let mut index = open(&base, 4, 8);
        for id in 1..=40 {
            index.insert(id_key(id), id).unwrap();
        }
        index.clear().unwrap();
        index.insert(id_key(3), 3).unwrap();
    }

    let index = open(&base, 4, 8);
    assert_eq!(index.len(), 1);
    assert_eq!(index.lookup(id_key(3)), vec![3]);
}

#[test]
fn test_stored_shape_wins_on_reopen() {
    let (_temp, base) = setup_temp_index();
    {
        let mut index = open(&base, 3, 6);
        index.insert(id_key(1), 1).unwrap();
    }

    let index = open(&base, 10, 12);
    assert_eq!(index.capacity(), 3);
    assert_eq!(index.max_depth(), 6);
    assert_eq!(index.lookup(id_key(1)), vec![1]);
}

// =============================================================================
// Corruption Detection
// =============================================================================

#[test]
fn test_directory_pointing_at_missing_bucket_is_corruption() {
    let (_temp, base) = setup_temp_index();
    {
        open(&base, 4, 8);
    }

    let mut raw = vec![0u8];
    raw.extend_from_slice(&99u32.to_be_bytes());
    std::fs::write(base.with_extension("hdir"), raw).unwrap();

    let result = HashIndex::open(&base, settings(4, 8), SyncStrategy::OnClose);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}

#[test]
fn test_directory_size_mismatch_is_corruption() {
    let (_temp, base) = setup_temp_index();
    {
        open(&base, 4, 8);
    }

    // Claims depth 2 but holds a single slot
    let mut raw = vec![2u8];
    raw.extend_from_slice(&0u32.to_be_bytes());
    std::fs::write(base.with_extension("hdir"), raw).unwrap();

    let result = HashIndex::open(&base, settings(4, 8), SyncStrategy::OnClose);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}
