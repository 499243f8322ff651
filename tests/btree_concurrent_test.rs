//! Concurrency tests for the B+ tree index. Every thread runs its own
//! transaction context; the tree itself is shared through an Arc.

use std::sync::Arc;
use std::thread;

use cairn::buffer::BufferPoolManager;
use cairn::common::{PageId, RecordId, SlotId};
use cairn::concurrency::Transaction;
use cairn::index::{BPlusTree, IntegerComparator};
use cairn::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn key(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

fn rid(v: u32) -> RecordId {
    RecordId::new(PageId::new(v), SlotId::new(0))
}

fn create_tree(pool_size: usize) -> (Arc<BPlusTree<IntegerComparator>>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    let tree = BPlusTree::new("concurrent_index", bpm, IntegerComparator, 4, 4, 5).unwrap();
    (Arc::new(tree), temp_file)
}

#[test]
fn test_concurrent_disjoint_inserts() {
    let (tree, _temp) = create_tree(128);

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut txn = Transaction::new();
                for i in 0..150 {
                    let k = t * 1000 + i;
                    assert!(tree.insert(&key(k), rid(k), &mut txn).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4u32 {
        for i in 0..150 {
            let k = t * 1000 + i;
            assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)], "key {}", k);
        }
    }
}

#[test]
fn test_concurrent_interleaved_inserts() {
    let (tree, _temp) = create_tree(128);

    // Threads insert stripes that interleave within the same leaves.
    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut txn = Transaction::new();
                for i in 0..150 {
                    let k = i * 4 + t;
                    assert!(tree.insert(&key(k), rid(k), &mut txn).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for k in 0..600 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)], "key {}", k);
    }

    // The leaf chain covers exactly the inserted keys, in order.
    let scanned: Vec<u32> = tree
        .begin()
        .unwrap()
        .map(|(k, _)| u32::from_le_bytes([k[0], k[1], k[2], k[3]]))
        .collect();
    assert_eq!(scanned, (0..600).collect::<Vec<u32>>());
}

#[test]
fn test_readers_during_writes() {
    let (tree, _temp) = create_tree(128);

    // A stable prefix the readers can always expect to find.
    {
        let mut txn = Transaction::new();
        for k in 0..100 {
            tree.insert(&key(k), rid(k), &mut txn).unwrap();
        }
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            let mut txn = Transaction::new();
            for k in 100..400 {
                tree.insert(&key(k), rid(k), &mut txn).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for round in 0..50 {
                    for k in 0..100 {
                        assert_eq!(
                            tree.get_value(&key(k)).unwrap(),
                            vec![rid(k)],
                            "stable key {} missing in round {}",
                            k,
                            round
                        );
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for k in 0..400 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)]);
    }
}

#[test]
fn test_concurrent_removes() {
    let (tree, _temp) = create_tree(128);

    {
        let mut txn = Transaction::new();
        for k in 0..400 {
            tree.insert(&key(k), rid(k), &mut txn).unwrap();
        }
    }

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut txn = Transaction::new();
                for i in 0..100 {
                    let k = t * 100 + i;
                    tree.remove(&key(k), &mut txn).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(tree.is_empty());
    for k in 0..400 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![], "key {}", k);
    }
}

#[test]
fn test_concurrent_insert_then_remove_mix() {
    let (tree, _temp) = create_tree(128);

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut txn = Transaction::new();
                let base = t * 500;
                for i in 0..100 {
                    tree.insert(&key(base + i), rid(base + i), &mut txn).unwrap();
                }
                // Each thread removes the odd keys it inserted.
                for i in (1..100).step_by(2) {
                    tree.remove(&key(base + i), &mut txn).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4u32 {
        let base = t * 500;
        for i in 0..100 {
            let expected = if i % 2 == 0 { vec![rid(base + i)] } else { vec![] };
            assert_eq!(tree.get_value(&key(base + i)).unwrap(), expected);
        }
    }
}
