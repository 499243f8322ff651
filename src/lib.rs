//! Cairn - the storage-engine core of a disk-oriented embedded database
//!
//! The crate stacks four components, each built on the one below:
//!
//! - **Storage Layer** (`storage`): page-granular disk I/O
//!   - `DiskManager`: reads and writes fixed-size page images by page id
//!   - `DiskScheduler`: background I/O worker with synchronous completion
//!   - `HeaderPage`: the well-known page 0 mapping index names to roots
//!
//! - **Containers** (`container`):
//!   - `ExtendibleHashTable`: directory-doubling hash map, used by the
//!     buffer pool as its page-id to frame directory
//!
//! - **Buffer Pool** (`buffer`): a fixed array of frames over the disk
//!   - `BufferPoolManager`: pinned page fetch/new, flush, delete
//!   - `LruKReplacer`: LRU-K eviction policy
//!   - `Page`: frame state - page image, latch, pin count, dirty flag
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin + latch
//!
//! - **Index** (`index`): a concurrent B+ tree stored as pages
//!   - `BPlusTree`: unique-key search/insert/remove with latch crabbing
//!   - `IndexIterator`: key-ordered scan along the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cairn::buffer::BufferPoolManager;
//! use cairn::common::{PageId, RecordId, SlotId};
//! use cairn::concurrency::Transaction;
//! use cairn::index::{BPlusTree, IntegerComparator};
//! use cairn::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! let tree = BPlusTree::new("test_index", bpm, IntegerComparator, 4, 32, 32).unwrap();
//!
//! let mut txn = Transaction::new();
//! let key = 42u32.to_le_bytes();
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! tree.insert(&key, rid, &mut txn).unwrap();
//! assert_eq!(tree.get_value(&key).unwrap(), vec![rid]);
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{CairnError, FrameId, PageId, RecordId, Result, SlotId};
