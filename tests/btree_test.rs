//! Integration tests for the B+ tree index

use std::sync::Arc;

use cairn::buffer::BufferPoolManager;
use cairn::common::{CairnError, PageId, RecordId, SlotId, INVALID_PAGE_ID};
use cairn::concurrency::Transaction;
use cairn::index::{BPlusTree, BTreeNodeRef, IntegerComparator};
use cairn::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    (bpm, temp_file)
}

fn key(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

fn rid(v: u32) -> RecordId {
    RecordId::new(PageId::new(v), SlotId::new(0))
}

fn small_tree(bpm: &Arc<BufferPoolManager>) -> BPlusTree<IntegerComparator> {
    // leaf_max_size = 4, internal_max_size = 5
    BPlusTree::new("test_index", Arc::clone(bpm), IntegerComparator, 4, 4, 5).unwrap()
}

#[test]
fn test_insert_and_point_lookup() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    assert!(tree.insert(&key(5), rid(50), &mut txn).unwrap());
    assert!(tree.insert(&key(3), rid(30), &mut txn).unwrap());
    assert!(tree.insert(&key(7), rid(70), &mut txn).unwrap());

    assert_eq!(tree.get_value(&key(3)).unwrap(), vec![rid(30)]);
    assert_eq!(tree.get_value(&key(7)).unwrap(), vec![rid(70)]);
    assert_eq!(tree.get_value(&key(1)).unwrap(), vec![]);
}

#[test]
fn test_duplicate_insert_rejected() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    assert!(tree.insert(&key(1), rid(1), &mut txn).unwrap());
    assert!(!tree.insert(&key(1), rid(2), &mut txn).unwrap());
    assert_eq!(tree.get_value(&key(1)).unwrap(), vec![rid(1)]);
}

#[test]
fn test_empty_tree_operations() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&key(1)).unwrap(), vec![]);
    tree.remove(&key(1), &mut txn).unwrap();
    assert!(tree.begin().unwrap().is_end());
}

#[test]
fn test_key_length_validation() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    let wrong = 1u64.to_le_bytes();
    assert!(matches!(
        tree.insert(&wrong, rid(1), &mut txn),
        Err(CairnError::InvalidKeyLength { expected: 4, actual: 8 })
    ));
    assert!(tree.get_value(&wrong).is_err());
}

#[test]
fn test_config_validation() {
    let (bpm, _temp) = create_bpm(10);

    assert!(matches!(
        BPlusTree::new("bad", Arc::clone(&bpm), IntegerComparator, 5, 4, 5),
        Err(CairnError::IndexConfig(_))
    ));
    assert!(matches!(
        BPlusTree::new("bad", Arc::clone(&bpm), IntegerComparator, 4, 2, 5),
        Err(CairnError::IndexConfig(_))
    ));
    assert!(matches!(
        BPlusTree::new("bad", Arc::clone(&bpm), IntegerComparator, 4, 4, 10_000),
        Err(CairnError::IndexConfig(_))
    ));
}

#[test]
fn test_leaf_split_shape() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    for k in 1..=5 {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }

    // The first leaf split promotes 3; the root is now internal with
    // leaves [1,2] and [3,4,5] chained left to right.
    let root_id = tree.root_page_id();
    let (left_id, right_id) = {
        let guard = bpm.read_page(root_id).unwrap();
        let root = BTreeNodeRef::new(guard.data(), 4);
        assert!(!root.is_leaf());
        assert_eq!(root.size(), 2);
        assert_eq!(root.key_at(1), key(3));
        (root.child_at(0), root.child_at(1))
    };
    {
        let guard = bpm.read_page(left_id).unwrap();
        let left = BTreeNodeRef::new(guard.data(), 4);
        assert!(left.is_leaf());
        assert_eq!(left.size(), 2);
        assert_eq!(left.key_at(0), key(1));
        assert_eq!(left.key_at(1), key(2));
        assert_eq!(left.next_page_id(), right_id);
        assert_eq!(left.parent_page_id(), root_id);
    }
    {
        let guard = bpm.read_page(right_id).unwrap();
        let right = BTreeNodeRef::new(guard.data(), 4);
        assert!(right.is_leaf());
        assert_eq!(right.size(), 3);
        assert_eq!(right.key_at(0), key(3));
        assert_eq!(right.key_at(2), key(5));
        assert_eq!(right.next_page_id(), INVALID_PAGE_ID);
    }

    for k in 1..=5 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)]);
    }
}

#[test]
fn test_internal_split_grows_root() {
    let (bpm, _temp) = create_bpm(20);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    // Sequential inserts keep splitting the rightmost leaf; by 12 the
    // old internal root has filled and split, promoting 7.
    for k in 1..=12 {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }

    let root_id = tree.root_page_id();
    let guard = bpm.read_page(root_id).unwrap();
    let root = BTreeNodeRef::new(guard.data(), 4);
    assert!(!root.is_leaf());
    assert_eq!(root.size(), 2);
    assert_eq!(root.key_at(1), key(7));

    let (left_id, right_id) = (root.child_at(0), root.child_at(1));
    drop(guard);
    for child_id in [left_id, right_id] {
        let guard = bpm.read_page(child_id).unwrap();
        let child = BTreeNodeRef::new(guard.data(), 4);
        assert!(!child.is_leaf());
        assert_eq!(child.parent_page_id(), root_id);
    }

    for k in 1..=12 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)], "key {}", k);
    }
}

#[test]
fn test_remove_merges_back_to_single_leaf() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    for k in 1..=5 {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }
    tree.remove(&key(5), &mut txn).unwrap();
    tree.remove(&key(4), &mut txn).unwrap();

    // The right leaf underflowed and merged left; the internal root
    // collapsed onto the merged leaf.
    let root_id = tree.root_page_id();
    let guard = bpm.read_page(root_id).unwrap();
    let root = BTreeNodeRef::new(guard.data(), 4);
    assert!(root.is_leaf());
    assert_eq!(root.size(), 3);
    assert_eq!(root.key_at(0), key(1));
    assert_eq!(root.key_at(1), key(2));
    assert_eq!(root.key_at(2), key(3));
    assert_eq!(root.parent_page_id(), INVALID_PAGE_ID);
    drop(guard);

    assert_eq!(tree.get_value(&key(4)).unwrap(), vec![]);
    assert_eq!(tree.get_value(&key(5)).unwrap(), vec![]);
    for k in 1..=3 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)]);
    }
}

#[test]
fn test_leaf_borrow_from_right_updates_separator() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    for k in 1..=5 {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }
    // Leaves are [1,2] and [3,4,5]. Removing 2 underflows the left
    // leaf, which borrows 3; the separator becomes 4.
    tree.remove(&key(2), &mut txn).unwrap();

    let guard = bpm.read_page(tree.root_page_id()).unwrap();
    let root = BTreeNodeRef::new(guard.data(), 4);
    assert!(!root.is_leaf());
    assert_eq!(root.key_at(1), key(4));
    drop(guard);

    assert_eq!(tree.get_value(&key(2)).unwrap(), vec![]);
    for k in [1, 3, 4, 5] {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)]);
    }
}

#[test]
fn test_remove_until_empty() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    for k in 1..=3 {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }
    for k in 1..=3 {
        tree.remove(&key(k), &mut txn).unwrap();
    }

    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
    assert_eq!(tree.get_value(&key(1)).unwrap(), vec![]);

    // The tree works again after being emptied.
    assert!(tree.insert(&key(10), rid(10), &mut txn).unwrap());
    assert_eq!(tree.get_value(&key(10)).unwrap(), vec![rid(10)]);
}

#[test]
fn test_volume_ascending() {
    let (bpm, _temp) = create_bpm(50);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    for k in 0..500 {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }
    for k in 0..500 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)], "key {}", k);
    }
}

#[test]
fn test_volume_descending() {
    let (bpm, _temp) = create_bpm(50);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    for k in (0..300).rev() {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }
    for k in 0..300 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)], "key {}", k);
    }
}

#[test]
fn test_volume_random_insert_remove() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (bpm, _temp) = create_bpm(50);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    let mut keys: Vec<u32> = (0..200).collect();
    keys.shuffle(&mut thread_rng());
    for &k in &keys {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }

    let mut to_remove = keys.clone();
    to_remove.shuffle(&mut thread_rng());
    for (i, &k) in to_remove.iter().enumerate() {
        tree.remove(&key(k), &mut txn).unwrap();
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![], "key {}", k);

        // Spot-check that the not-yet-removed keys are still intact.
        if i % 20 == 0 {
            for &still in &to_remove[i + 1..] {
                assert_eq!(
                    tree.get_value(&key(still)).unwrap(),
                    vec![rid(still)],
                    "key {} lost after removing {}",
                    still,
                    k
                );
            }
        }
    }
    assert!(tree.is_empty());
}

#[test]
fn test_iterator_full_scan_sorted() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (bpm, _temp) = create_bpm(50);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    let mut keys: Vec<u32> = (0..150).collect();
    keys.shuffle(&mut thread_rng());
    for &k in &keys {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }

    let mut seen = Vec::new();
    let mut iter = tree.begin().unwrap();
    while !iter.is_end() {
        let (k, r) = iter.current().unwrap();
        let k = u32::from_le_bytes([k[0], k[1], k[2], k[3]]);
        assert_eq!(r, rid(k));
        seen.push(k);
        iter.advance().unwrap();
    }
    assert_eq!(seen, (0..150).collect::<Vec<u32>>());
}

#[test]
fn test_iterator_begin_at() {
    let (bpm, _temp) = create_bpm(50);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    for k in (0..100).step_by(2) {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }

    // Positioned on an existing key, the iterator yields the suffix.
    let iter = tree.begin_at(&key(40)).unwrap();
    let suffix: Vec<u32> = iter
        .map(|(k, _)| u32::from_le_bytes([k[0], k[1], k[2], k[3]]))
        .collect();
    assert_eq!(suffix, (40..100).step_by(2).collect::<Vec<u32>>());

    // An absent key produces the end iterator.
    assert!(tree.begin_at(&key(41)).unwrap().is_end());
    assert!(tree.begin_at(&key(200)).unwrap().is_end());
}

#[test]
fn test_iterator_equality() {
    let (bpm, _temp) = create_bpm(10);
    let tree = small_tree(&bpm);
    let mut txn = Transaction::new();

    for k in 1..=3 {
        tree.insert(&key(k), rid(k), &mut txn).unwrap();
    }

    let a = tree.begin().unwrap();
    let b = tree.begin().unwrap();
    assert!(a.equals(&b));

    let mut c = tree.begin().unwrap();
    c.advance().unwrap();
    assert!(!a.equals(&c));

    assert!(tree.end().equals(&tree.end()));
}

#[test]
fn test_persistence_through_header_page() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(20, 2, disk_manager));
        let tree =
            BPlusTree::new("orders_pk", Arc::clone(&bpm), IntegerComparator, 4, 4, 5).unwrap();
        let mut txn = Transaction::new();

        for k in 0..50 {
            tree.insert(&key(k), rid(k), &mut txn).unwrap();
        }
        bpm.flush_all_pages().unwrap();
    }

    let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(20, 2, disk_manager));
    let tree = BPlusTree::open("orders_pk", Arc::clone(&bpm), IntegerComparator, 4, 4, 5).unwrap();

    assert!(!tree.is_empty());
    for k in 0..50 {
        assert_eq!(
            tree.get_value(&key(k)).unwrap(),
            vec![rid(k)],
            "key {} lost across reopen",
            k
        );
    }
}
