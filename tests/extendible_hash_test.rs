//! Integration tests for the extendible hash table

use std::hash::{BuildHasherDefault, Hasher};
use std::sync::Arc;
use std::thread;

use cairn::container::ExtendibleHashTable;

/// Hashes a u64 to itself so tests can dictate bucket placement.
#[derive(Default)]
struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = (self.0 << 8) | b as u64;
        }
    }

    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }
}

type IdentityBuild = BuildHasherDefault<IdentityHasher>;

#[test]
fn test_directory_doubling_sequence() {
    // bucket_size = 2; hashes 0b000, 0b100, 0b010, 0b110 in order drive
    // the directory from depth 0 to depth 2 with three live buckets.
    let table: ExtendibleHashTable<u64, u64, IdentityBuild> =
        ExtendibleHashTable::with_hasher(2, IdentityBuild::default());

    table.insert(0b000, 10);
    table.insert(0b100, 20);
    assert_eq!(table.global_depth(), 0);
    assert_eq!(table.num_buckets(), 1);

    table.insert(0b010, 30);
    assert_eq!(table.global_depth(), 2);
    assert_eq!(table.num_buckets(), 3);

    table.insert(0b110, 40);
    assert_eq!(table.global_depth(), 2);
    assert_eq!(table.num_buckets(), 3);

    assert_eq!(table.find(&0b000), Some(10));
    assert_eq!(table.find(&0b100), Some(20));
    assert_eq!(table.find(&0b010), Some(30));
    assert_eq!(table.find(&0b110), Some(40));
}

#[test]
fn test_local_depths_after_split() {
    let table: ExtendibleHashTable<u64, u64, IdentityBuild> =
        ExtendibleHashTable::with_hasher(2, IdentityBuild::default());

    for key in [0b000u64, 0b100, 0b010, 0b110] {
        table.insert(key, key);
    }

    // Even slots saw two splits; odd slots still share the depth-1
    // bucket created by the first split.
    assert_eq!(table.dir_size(), 4);
    assert_eq!(table.local_depth(0), 2);
    assert_eq!(table.local_depth(1), 1);
    assert_eq!(table.local_depth(2), 2);
    assert_eq!(table.local_depth(3), 1);
    for i in 0..table.dir_size() {
        assert!(table.local_depth(i) <= table.global_depth());
    }
}

#[test]
fn test_upsert_and_remove() {
    let table: ExtendibleHashTable<u64, String, IdentityBuild> =
        ExtendibleHashTable::with_hasher(2, IdentityBuild::default());

    table.insert(1, "one".to_string());
    table.insert(1, "uno".to_string());
    assert_eq!(table.find(&1), Some("uno".to_string()));
    assert_eq!(table.num_buckets(), 1);

    assert!(table.remove(&1));
    assert!(!table.remove(&1));
    assert_eq!(table.find(&1), None);
}

#[test]
fn test_many_keys_default_hasher() {
    let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);

    for i in 0..1000 {
        table.insert(i, i * 3);
    }
    for i in 0..1000 {
        assert_eq!(table.find(&i), Some(i * 3), "missing key {}", i);
    }
    for i in (0..1000).step_by(2) {
        assert!(table.remove(&i));
    }
    for i in 0..1000 {
        let expected = if i % 2 == 0 { None } else { Some(i * 3) };
        assert_eq!(table.find(&i), expected);
    }
}

#[test]
fn test_concurrent_mixed_workload() {
    let table: Arc<ExtendibleHashTable<u32, u32>> = Arc::new(ExtendibleHashTable::new(4));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..200u32 {
                    let key = t * 200 + i;
                    table.insert(key, key);
                    if i % 3 == 0 {
                        table.remove(&key);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..8u32 {
        for i in 0..200u32 {
            let key = t * 200 + i;
            let expected = if i % 3 == 0 { None } else { Some(key) };
            assert_eq!(table.find(&key), expected, "key {}", key);
        }
    }
}
