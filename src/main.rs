use std::sync::Arc;

use cairn::buffer::BufferPoolManager;
use cairn::common::{PageId, RecordId, SlotId};
use cairn::concurrency::Transaction;
use cairn::index::{BPlusTree, IntegerComparator};
use cairn::storage::disk::DiskManager;

fn main() {
    println!("Cairn - storage engine core");
    println!("===========================\n");

    let db_path = "demo.db";
    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Opened database file: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(10, 2, disk_manager));
    println!("Created buffer pool with 10 frames, LRU-2 replacement\n");

    let tree = BPlusTree::new("demo_index", Arc::clone(&bpm), IntegerComparator, 4, 4, 5)
        .expect("Failed to create index");

    let mut txn = Transaction::new();
    for key in [5u32, 3, 7, 1, 9, 2, 8, 4, 6] {
        let rid = RecordId::new(PageId::new(100), SlotId::new(key as u16));
        tree.insert(&key.to_le_bytes(), rid, &mut txn)
            .expect("Insert failed");
        println!("Inserted key {}", key);
    }

    let values = tree.get_value(&7u32.to_le_bytes()).expect("Lookup failed");
    println!("\nLookup key 7 -> {:?}", values);

    print!("Full scan:");
    let iter = tree.begin().expect("Scan failed");
    for (key, _rid) in iter {
        let key = u32::from_le_bytes([key[0], key[1], key[2], key[3]]);
        print!(" {}", key);
    }
    println!();

    tree.remove(&5u32.to_le_bytes(), &mut txn).expect("Remove failed");
    println!("\nRemoved key 5");
    let values = tree.get_value(&5u32.to_le_bytes()).expect("Lookup failed");
    println!("Lookup key 5 -> {:?}", values);

    bpm.flush_all_pages().expect("Flush failed");
    println!("\nFlushed all pages; root page id = {}", tree.root_page_id());
}
