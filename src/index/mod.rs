pub mod btree_index;
pub mod btree_page;
pub mod index_iterator;
pub mod key_comparator;

pub use btree_index::BPlusTree;
pub use btree_page::{BTreeNode, BTreeNodeRef, BTreePageType};
pub use index_iterator::IndexIterator;
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
