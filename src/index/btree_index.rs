use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    CairnError, PageId, RecordId, Result, GENERIC_KEY_SIZES, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::concurrency::{RootLatchGuard, Transaction};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{internal_capacity, leaf_capacity, BTreeNode, BTreeNodeRef};
use super::index_iterator::IndexIterator;
use super::key_comparator::KeyComparator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Remove,
}

fn corrupted(msg: &str) -> CairnError {
    CairnError::IndexCorrupted(msg.to_string())
}

/// A disk-resident B+ tree index with unique keys.
///
/// Nodes are pages obtained through the buffer pool; parent, child and
/// leaf-sibling links are page ids. The root page id is guarded by its
/// own reader/writer latch and persisted in the header page under the
/// index name, so an index can be reopened by name.
///
/// Mutations descend with latch crabbing: an optimistic pass takes
/// shared latches down to the leaf and an exclusive latch on the leaf
/// alone, restarting pessimistically (exclusive latches on the whole
/// path, releasing safe prefixes) when the leaf could split or merge.
/// The latched path rides in the caller's [`Transaction`] page set.
pub struct BPlusTree<C: KeyComparator> {
    name: String,
    root: Arc<RwLock<PageId>>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    key_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates a handle for a fresh index. The tree stays empty (root
    /// INVALID) until the first insert.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        Self::validate_config(key_size, leaf_max_size, internal_max_size)?;
        Ok(Self {
            name: name.into(),
            root: Arc::new(RwLock::new(INVALID_PAGE_ID)),
            bpm,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Opens an existing index, recovering its root page id from the
    /// header page record stored under `name`.
    pub fn open(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let name = name.into();
        Self::validate_config(key_size, leaf_max_size, internal_max_size)?;

        let root_page_id = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            let header = HeaderPageRef::new(guard.data());
            header.get_record(&name).unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            name,
            root: Arc::new(RwLock::new(root_page_id)),
            bpm,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
        })
    }

    fn validate_config(key_size: usize, leaf_max_size: usize, internal_max_size: usize) -> Result<()> {
        if !GENERIC_KEY_SIZES.contains(&key_size) {
            return Err(CairnError::IndexConfig(format!(
                "unsupported key size {} (expected one of {:?})",
                key_size, GENERIC_KEY_SIZES
            )));
        }
        if leaf_max_size < 3 || internal_max_size < 3 {
            return Err(CairnError::IndexConfig(
                "leaf and internal max sizes must be at least 3".to_string(),
            ));
        }
        if leaf_max_size > leaf_capacity(key_size) {
            return Err(CairnError::IndexConfig(format!(
                "leaf max size {} exceeds page capacity {}",
                leaf_max_size,
                leaf_capacity(key_size)
            )));
        }
        if internal_max_size > internal_capacity(key_size) {
            return Err(CairnError::IndexConfig(format!(
                "internal max size {} exceeds page capacity {}",
                internal_max_size,
                internal_capacity(key_size)
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(CairnError::InvalidKeyLength {
                expected: self.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn node_ref<'a>(&self, guard: &'a ReadPageGuard) -> BTreeNodeRef<'a> {
        BTreeNodeRef::new(guard.data(), self.key_size)
    }

    fn node_of<'a>(&self, guard: &'a WritePageGuard) -> BTreeNodeRef<'a> {
        BTreeNodeRef::new(guard.data(), self.key_size)
    }

    /// A node can absorb the operation without structural change
    /// propagating to its parent.
    fn is_safe(&self, node: &BTreeNodeRef<'_>, op: WriteOp) -> bool {
        match op {
            WriteOp::Insert => {
                if node.is_leaf() {
                    node.size() < node.max_size() - 1
                } else {
                    node.size() < node.max_size()
                }
            }
            WriteOp::Remove => node.size() > node.min_size(),
        }
    }

    /*****************************************************************
     * Search
     *****************************************************************/

    /// Collects every value stored under `key` (at most one, since keys
    /// are unique).
    pub fn get_value(&self, key: &[u8]) -> Result<Vec<RecordId>> {
        self.check_key(key)?;
        let mut result = Vec::new();

        let Some(guard) = self.find_leaf(key)? else {
            return Ok(result);
        };
        let node = self.node_ref(&guard);
        for i in 0..node.size() {
            if self.comparator.compare(node.key_at(i), key).is_eq() {
                result.push(node.rid_at(i));
            }
        }
        Ok(result)
    }

    /// Shared-latch descent to the leaf that may hold `key`. Each child
    /// is latched before its parent (or the root-id latch) is released.
    /// Returns None on an empty tree.
    fn find_leaf(&self, key: &[u8]) -> Result<Option<ReadPageGuard>> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.bpm.read_page(root_id)?;
        drop(root_latch);

        loop {
            if self.node_ref(&guard).is_leaf() {
                return Ok(Some(guard));
            }
            let child_id = self.node_ref(&guard).lookup_child(key, &self.comparator);
            let child = self.bpm.read_page(child_id)?;
            guard = child;
        }
    }

    /*****************************************************************
     * Latch crabbing
     *****************************************************************/

    /// Takes the root-id latch exclusively and resolves the root page.
    /// An empty tree is bootstrapped with a fresh leaf root for inserts;
    /// removes get None back with every latch released. On success the
    /// root-latch sentinel heads the page set.
    fn acquire_root_for_write(
        &self,
        op: WriteOp,
        txn: &mut Transaction,
    ) -> Result<Option<PageId>> {
        let mut root_latch = unsafe { RootLatchGuard::new(Arc::clone(&self.root)) };
        let mut root_id = root_latch.get();

        if root_id == INVALID_PAGE_ID {
            if op == WriteOp::Remove {
                return Ok(None);
            }
            let mut guard = self.bpm.new_page_write()?;
            let new_root_id = guard.page_id();
            BTreeNode::new(guard.data_mut(), self.key_size).init_leaf(
                new_root_id,
                INVALID_PAGE_ID,
                self.leaf_max_size,
            );
            drop(guard);
            root_latch.set(new_root_id);
            root_id = new_root_id;
            self.update_root_record(new_root_id)?;
        }

        txn.push_root(root_latch);
        Ok(Some(root_id))
    }

    /// Optimistic pass: shared latches down the internal levels, an
    /// exclusive latch on the leaf only. Returns Ok(None) when the leaf
    /// turns out unsafe and the descent must restart pessimistically;
    /// Ok(Some(false)) when a remove found an empty tree.
    fn latch_leaf_optimistic(
        &self,
        key: &[u8],
        op: WriteOp,
        txn: &mut Transaction,
    ) -> Result<Option<bool>> {
        let Some(root_id) = self.acquire_root_for_write(op, txn)? else {
            return Ok(Some(false));
        };

        let mut prev: Option<ReadPageGuard> = None;
        let mut cur_page_id = root_id;

        loop {
            let read_guard = self.bpm.read_page(cur_page_id)?;
            let (is_leaf, child_id) = {
                let node = self.node_ref(&read_guard);
                if node.is_leaf() {
                    (true, INVALID_PAGE_ID)
                } else {
                    (false, node.lookup_child(key, &self.comparator))
                }
            };

            if is_leaf {
                // Re-take the leaf exclusively. The parent's shared latch
                // (or the root-id latch for a leaf root) is still held,
                // which keeps any structural change off this leaf.
                drop(read_guard);
                let guard = self.bpm.write_page(cur_page_id)?;
                let safe = self.is_safe(&self.node_of(&guard), op);
                txn.push_page(guard);
                drop(prev);
                if !safe {
                    txn.release_all();
                    return Ok(None);
                }
                return Ok(Some(true));
            }

            // Internal node: release the ancestor, or the root-id latch
            // when this is the first level.
            match prev.take() {
                Some(ancestor) => drop(ancestor),
                None => txn.release_all(),
            }
            prev = Some(read_guard);
            cur_page_id = child_id;
        }
    }

    /// Pessimistic pass: exclusive latches on every page of the path,
    /// releasing the held prefix whenever a child proves safe. The leaf
    /// ends up at the back of the page set with every unsafe ancestor
    /// (and possibly the root-id latch) still held.
    fn latch_leaf_pessimistic(
        &self,
        key: &[u8],
        op: WriteOp,
        txn: &mut Transaction,
    ) -> Result<bool> {
        let Some(root_id) = self.acquire_root_for_write(op, txn)? else {
            return Ok(false);
        };

        let mut cur_page_id = root_id;
        loop {
            let guard = self.bpm.write_page(cur_page_id)?;
            let (is_leaf, safe, child_id) = {
                let node = self.node_of(&guard);
                let is_leaf = node.is_leaf();
                let safe = self.is_safe(&node, op);
                let child_id = if is_leaf {
                    INVALID_PAGE_ID
                } else {
                    node.lookup_child(key, &self.comparator)
                };
                (is_leaf, safe, child_id)
            };

            if safe {
                txn.release_all();
            }
            txn.push_page(guard);
            if is_leaf {
                return Ok(true);
            }
            cur_page_id = child_id;
        }
    }

    /// Two-phase descent for a mutation; on return the leaf is latched
    /// at the back of the page set. False means there was nothing to
    /// latch (remove on an empty tree).
    fn latch_leaf_for_write(
        &self,
        key: &[u8],
        op: WriteOp,
        txn: &mut Transaction,
    ) -> Result<bool> {
        match self.latch_leaf_optimistic(key, op, txn)? {
            Some(got_leaf) => Ok(got_leaf),
            None => self.latch_leaf_pessimistic(key, op, txn),
        }
    }

    /// Writes (or first records) the index's root page id in the header
    /// page.
    fn update_root_record(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.name, root_id) && !header.insert_record(&self.name, root_id)
        {
            return Err(corrupted("header page is full"));
        }
        Ok(())
    }

    /*****************************************************************
     * Insert
     *****************************************************************/

    /// Inserts `key -> rid`. Returns false when the key is already
    /// present; the tree only supports unique keys.
    pub fn insert(&self, key: &[u8], rid: RecordId, txn: &mut Transaction) -> Result<bool> {
        self.check_key(key)?;
        if !self.latch_leaf_for_write(key, WriteOp::Insert, txn)? {
            return Err(corrupted("insert failed to reach a leaf"));
        }
        let leaf_pos = txn.page_set_len() - 1;

        // Duplicate check on a read view keeps a rejected insert clean.
        let duplicate = {
            let leaf = txn.page_at(leaf_pos).ok_or_else(|| corrupted("leaf not latched"))?;
            let node = self.node_of(leaf);
            let pos = node.lower_bound(key, &self.comparator);
            pos < node.size() && self.comparator.compare(node.key_at(pos), key).is_eq()
        };
        if duplicate {
            txn.release_all();
            return Ok(false);
        }

        let needs_split = {
            let leaf = txn
                .page_at_mut(leaf_pos)
                .ok_or_else(|| corrupted("leaf not latched"))?;
            let mut node = BTreeNode::new(leaf.data_mut(), self.key_size);
            node.leaf_insert(key, rid, &self.comparator);
            node.size() == node.max_size()
        };
        if !needs_split {
            txn.release_all();
            return Ok(true);
        }

        // Split: carve off a right sibling and splice it into the chain.
        let mut right = self.bpm.new_page_write()?;
        let right_id = right.page_id();
        {
            let leaf = txn
                .page_at_mut(leaf_pos)
                .ok_or_else(|| corrupted("leaf not latched"))?;
            let mut node = BTreeNode::new(leaf.data_mut(), self.key_size);
            let mut right_node = BTreeNode::new(right.data_mut(), self.key_size);
            right_node.init_leaf(right_id, node.parent_page_id(), self.leaf_max_size);
            node.leaf_split_into(&mut right_node);
            right_node.set_next_page_id(node.next_page_id());
            node.set_next_page_id(right_id);
        }

        let separator = self.node_of(&right).key_at(0).to_vec();
        self.insert_in_parent(txn, leaf_pos, separator, &mut right)?;

        txn.release_all();
        drop(right);
        Ok(true)
    }

    /// Links a freshly split-off `right` node into the parent of the
    /// node at `left_pos` in the page set, growing a new root when the
    /// left node was the root and recursing when the parent itself must
    /// split.
    fn insert_in_parent(
        &self,
        txn: &mut Transaction,
        left_pos: usize,
        separator: Vec<u8>,
        right: &mut WritePageGuard,
    ) -> Result<()> {
        let (left_id, left_parent_id) = {
            let left = txn
                .page_at(left_pos)
                .ok_or_else(|| corrupted("split node not in page set"))?;
            let node = self.node_of(left);
            (node.page_id(), node.parent_page_id())
        };
        let right_id = right.page_id();

        if left_parent_id == INVALID_PAGE_ID {
            // The split node was the root: grow a new internal root with
            // the two halves as its children.
            let mut root = self.bpm.new_page_write()?;
            let new_root_id = root.page_id();
            {
                let mut node = BTreeNode::new(root.data_mut(), self.key_size);
                node.init_internal(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                node.set_child_at(0, left_id);
                node.set_key_at(1, &separator);
                node.set_child_at(1, right_id);
                node.set_size(2);
            }
            {
                let left = txn
                    .page_at_mut(left_pos)
                    .ok_or_else(|| corrupted("split node not in page set"))?;
                BTreeNode::new(left.data_mut(), self.key_size).set_parent_page_id(new_root_id);
            }
            BTreeNode::new(right.data_mut(), self.key_size).set_parent_page_id(new_root_id);

            txn.root_guard_mut()
                .ok_or_else(|| corrupted("root latch not held for root growth"))?
                .set(new_root_id);
            self.update_root_record(new_root_id)?;
            return Ok(());
        }

        let parent_pos = left_pos
            .checked_sub(1)
            .ok_or_else(|| corrupted("parent not in page set"))?;
        {
            let parent = txn
                .page_at(parent_pos)
                .ok_or_else(|| corrupted("parent not in page set"))?;
            if self.node_of(parent).page_id() != left_parent_id {
                return Err(corrupted("page set does not match parent link"));
            }
        }

        let parent_has_room = {
            let parent = txn.page_at(parent_pos).ok_or_else(|| corrupted("parent missing"))?;
            let node = self.node_of(parent);
            node.size() < node.max_size()
        };
        if parent_has_room {
            let parent = txn
                .page_at_mut(parent_pos)
                .ok_or_else(|| corrupted("parent missing"))?;
            let mut node = BTreeNode::new(parent.data_mut(), self.key_size);
            node.internal_insert(&separator, right_id, &self.comparator);
            return Ok(());
        }

        // Parent is full: split it around the combined entry list and
        // promote the first key of the upper half.
        let mut new_parent = self.bpm.new_page_write()?;
        let new_parent_id = new_parent.page_id();
        let (promoted, moved_children) = {
            let parent = txn
                .page_at_mut(parent_pos)
                .ok_or_else(|| corrupted("parent missing"))?;
            let mut node = BTreeNode::new(parent.data_mut(), self.key_size);

            let mut entries: Vec<(Vec<u8>, PageId)> = (0..node.size())
                .map(|i| (node.key_at(i).to_vec(), node.child_at(i)))
                .collect();
            let mut lo = 1;
            let mut hi = entries.len();
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                if self.comparator.compare(&separator, &entries[mid].0).is_le() {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            entries.insert(lo, (separator.clone(), right_id));

            let keep = (self.internal_max_size + 1) / 2;
            node.set_size(keep);
            for (i, (k, c)) in entries[..keep].iter().enumerate() {
                node.set_key_at(i, k);
                node.set_child_at(i, *c);
            }

            let mut new_node = BTreeNode::new(new_parent.data_mut(), self.key_size);
            new_node.init_internal(new_parent_id, node.parent_page_id(), self.internal_max_size);
            new_node.set_size(entries.len() - keep);
            for (i, (k, c)) in entries[keep..].iter().enumerate() {
                new_node.set_key_at(i, k);
                new_node.set_child_at(i, *c);
            }

            let moved: Vec<PageId> = entries[keep..].iter().map(|(_, c)| *c).collect();
            (entries[keep].0.clone(), moved)
        };

        self.reparent_children(txn, &moved_children, new_parent_id, Some(right))?;
        self.insert_in_parent(txn, parent_pos, promoted, &mut new_parent)?;
        Ok(())
    }

    /// Rewrites the parent pointer of each child. A child already
    /// latched on this traversal (in the page set, or the extra guard a
    /// split is carrying) is written through its held guard; the rest
    /// are fetched and latched briefly.
    fn reparent_children(
        &self,
        txn: &mut Transaction,
        children: &[PageId],
        new_parent_id: PageId,
        mut extra: Option<&mut WritePageGuard>,
    ) -> Result<()> {
        for &child_id in children {
            if let Some(ref mut guard) = extra {
                if guard.page_id() == child_id {
                    BTreeNode::new(guard.data_mut(), self.key_size)
                        .set_parent_page_id(new_parent_id);
                    continue;
                }
            }
            if let Some(guard) = txn.find_page_mut(child_id) {
                BTreeNode::new(guard.data_mut(), self.key_size).set_parent_page_id(new_parent_id);
                continue;
            }
            let mut guard = self.bpm.write_page(child_id)?;
            BTreeNode::new(guard.data_mut(), self.key_size).set_parent_page_id(new_parent_id);
        }
        Ok(())
    }

    /*****************************************************************
     * Remove
     *****************************************************************/

    /// Removes `key` if present. Underflowing nodes borrow from or merge
    /// with a sibling; pages emptied by merges are deleted after every
    /// latch is released.
    pub fn remove(&self, key: &[u8], txn: &mut Transaction) -> Result<()> {
        self.check_key(key)?;
        if !self.latch_leaf_for_write(key, WriteOp::Remove, txn)? {
            return Ok(());
        }
        let leaf_pos = txn.page_set_len() - 1;

        let present = {
            let leaf = txn.page_at(leaf_pos).ok_or_else(|| corrupted("leaf not latched"))?;
            let node = self.node_of(leaf);
            let pos = node.lower_bound(key, &self.comparator);
            pos < node.size() && self.comparator.compare(node.key_at(pos), key).is_eq()
        };
        if !present {
            txn.release_all();
            return Ok(());
        }

        let (is_root, size, min_size) = {
            let leaf = txn
                .page_at_mut(leaf_pos)
                .ok_or_else(|| corrupted("leaf not latched"))?;
            let mut node = BTreeNode::new(leaf.data_mut(), self.key_size);
            node.leaf_remove(key, &self.comparator);
            (node.is_root(), node.size(), node.min_size())
        };

        if is_root {
            if size == 0 {
                txn.root_guard_mut()
                    .ok_or_else(|| corrupted("root latch not held for root removal"))?
                    .set(INVALID_PAGE_ID);
            }
            txn.release_all();
            return Ok(());
        }
        if size >= min_size {
            txn.release_all();
            return Ok(());
        }

        self.handle_underflow(txn, leaf_pos)?;
        txn.release_all();
        for page_id in txn.take_deleted_pages() {
            self.bpm.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Restores the minimum-occupancy invariant for the node at `pos` in
    /// the page set: collapse the root, or borrow from / merge with a
    /// sibling, recursing into the parent when the merge underflows it.
    fn handle_underflow(&self, txn: &mut Transaction, pos: usize) -> Result<()> {
        let (page_id, is_leaf, size, parent_id) = {
            let guard = txn
                .page_at(pos)
                .ok_or_else(|| corrupted("underflowed node not in page set"))?;
            let node = self.node_of(guard);
            (node.page_id(), node.is_leaf(), node.size(), node.parent_page_id())
        };

        if parent_id == INVALID_PAGE_ID {
            // The root underflows only when an internal root is left
            // with a single child; that child becomes the new root.
            if is_leaf || size > 1 {
                return Ok(());
            }
            let child_id = {
                let guard = txn.page_at(pos).ok_or_else(|| corrupted("root not in page set"))?;
                self.node_of(guard).child_at(0)
            };
            txn.add_deleted_page(page_id);
            txn.root_guard_mut()
                .ok_or_else(|| corrupted("root latch not held for root collapse"))?
                .set(child_id);
            self.reparent_children(txn, &[child_id], INVALID_PAGE_ID, None)?;
            self.update_root_record(child_id)?;
            return Ok(());
        }

        let parent_pos = pos
            .checked_sub(1)
            .ok_or_else(|| corrupted("parent not in page set"))?;
        {
            let parent = txn
                .page_at(parent_pos)
                .ok_or_else(|| corrupted("parent not in page set"))?;
            if self.node_of(parent).page_id() != parent_id {
                return Err(corrupted("page set does not match parent link"));
            }
        }

        let (node_index, left_sibling_id, right_sibling_id) = {
            let parent = txn.page_at(parent_pos).ok_or_else(|| corrupted("parent missing"))?;
            let pnode = self.node_of(parent);
            let index = pnode
                .find_child_index(page_id)
                .ok_or_else(|| corrupted("child missing from parent"))?;
            let left = (index > 0).then(|| pnode.child_at(index - 1));
            let right = (index + 1 < pnode.size()).then(|| pnode.child_at(index + 1));
            (index, left, right)
        };
        if left_sibling_id.is_none() && right_sibling_id.is_none() {
            return Err(corrupted("non-root node has no sibling"));
        }

        // Latch the sibling(s) for the duration of this rearrangement.
        // The parent's exclusive latch serializes competing underflows.
        let mut left_sibling = left_sibling_id
            .map(|id| self.bpm.write_page(id))
            .transpose()?;
        let mut right_sibling = right_sibling_id
            .map(|id| self.bpm.write_page(id))
            .transpose()?;

        if self.try_borrow(txn, pos, parent_pos, node_index, left_sibling.as_mut(), true)?
            || self.try_borrow(txn, pos, parent_pos, node_index, right_sibling.as_mut(), false)?
        {
            return Ok(());
        }

        // No sibling can spare an entry: merge into the left node.
        let (sibling, sibling_is_left) = match left_sibling.take() {
            Some(guard) => {
                drop(right_sibling.take());
                (guard, true)
            }
            None => (
                right_sibling
                    .take()
                    .ok_or_else(|| corrupted("no sibling to merge with"))?,
                false,
            ),
        };

        let (deleted_id, survivor_id, moved_children, parent_underflows) =
            self.merge(txn, pos, parent_pos, sibling, sibling_is_left)?;

        txn.add_deleted_page(deleted_id);
        self.reparent_children(txn, &moved_children, survivor_id, None)?;

        if parent_underflows {
            self.handle_underflow(txn, parent_pos)?;
        }
        Ok(())
    }

    /// Moves one entry from a sibling with spare occupancy into the
    /// underflowed node and refreshes the parent separator. Returns
    /// false when the sibling cannot spare an entry.
    fn try_borrow(
        &self,
        txn: &mut Transaction,
        pos: usize,
        parent_pos: usize,
        node_index: usize,
        sibling: Option<&mut WritePageGuard>,
        is_left: bool,
    ) -> Result<bool> {
        let Some(sibling) = sibling else {
            return Ok(false);
        };
        {
            let snode = self.node_of(sibling);
            if snode.size() <= snode.min_size() {
                return Ok(false);
            }
        }

        let parent_update_at = node_index + if is_left { 0 } else { 1 };
        let mut moved_child: Option<(PageId, PageId)> = None;

        {
            let (parent_guard, node_guard) = txn
                .pages_pair_mut(parent_pos, pos)
                .ok_or_else(|| corrupted("borrow requires parent and node latched"))?;
            let mut node = BTreeNode::new(node_guard.data_mut(), self.key_size);
            let mut snode = BTreeNode::new(sibling.data_mut(), self.key_size);
            let mut pnode = BTreeNode::new(parent_guard.data_mut(), self.key_size);

            let update_key = if node.is_leaf() {
                let borrow_at = if is_left { snode.size() - 1 } else { 0 };
                let key = snode.key_at(borrow_at).to_vec();
                let rid = snode.rid_at(borrow_at);
                node.leaf_insert(&key, rid, &self.comparator);
                snode.leaf_remove(&key, &self.comparator);
                if is_left {
                    node.key_at(0).to_vec()
                } else {
                    snode.key_at(0).to_vec()
                }
            } else if is_left {
                // Rotate the sibling's last child through the parent
                // separator into slot 0 of the node.
                let borrow_at = snode.size() - 1;
                let update_key = snode.key_at(borrow_at).to_vec();
                let child = snode.child_at(borrow_at);
                let separator = pnode.key_at(parent_update_at).to_vec();
                node.internal_shift_right();
                node.set_key_at(1, &separator);
                node.set_child_at(0, child);
                snode.set_size(borrow_at);
                moved_child = Some((child, node.page_id()));
                update_key
            } else {
                // Rotate the sibling's first child through the parent
                // separator onto the end of the node.
                let update_key = snode.key_at(1).to_vec();
                let child = snode.child_at(0);
                let separator = pnode.key_at(parent_update_at).to_vec();
                let size = node.size();
                node.set_key_at(size, &separator);
                node.set_child_at(size, child);
                node.set_size(size + 1);
                snode.internal_shift_left(0);
                moved_child = Some((child, node.page_id()));
                update_key
            };

            pnode.set_key_at(parent_update_at, &update_key);
        }

        if let Some((child_id, new_parent_id)) = moved_child {
            self.reparent_children(txn, &[child_id], new_parent_id, None)?;
        }
        Ok(true)
    }

    /// Merges the node at `pos` with `sibling`, keeping the left one of
    /// the pair. Returns the deleted (right) page id, the survivor, the
    /// children the survivor gained, and whether the parent now
    /// underflows. The sibling latch is released on return.
    fn merge(
        &self,
        txn: &mut Transaction,
        pos: usize,
        parent_pos: usize,
        mut sibling: WritePageGuard,
        sibling_is_left: bool,
    ) -> Result<(PageId, PageId, Vec<PageId>, bool)> {
        let (parent_guard, node_guard) = txn
            .pages_pair_mut(parent_pos, pos)
            .ok_or_else(|| corrupted("merge requires parent and node latched"))?;
        let mut pnode = BTreeNode::new(parent_guard.data_mut(), self.key_size);

        let (mut lnode, mut rnode) = if sibling_is_left {
            (
                BTreeNode::new(sibling.data_mut(), self.key_size),
                BTreeNode::new(node_guard.data_mut(), self.key_size),
            )
        } else {
            (
                BTreeNode::new(node_guard.data_mut(), self.key_size),
                BTreeNode::new(sibling.data_mut(), self.key_size),
            )
        };

        let left_index = pnode
            .find_child_index(lnode.page_id())
            .ok_or_else(|| corrupted("merge survivor missing from parent"))?;
        let right_index = left_index + 1;

        let mut moved_children = Vec::new();
        if lnode.is_leaf() {
            for i in 0..rnode.size() {
                let key = rnode.key_at(i).to_vec();
                let rid = rnode.rid_at(i);
                lnode.leaf_insert(&key, rid, &self.comparator);
            }
            lnode.set_next_page_id(rnode.next_page_id());
        } else {
            // The separator between the halves comes down from the
            // parent, paired with the right node's first child.
            let separator = pnode.key_at(right_index).to_vec();
            let size = lnode.size();
            lnode.set_key_at(size, &separator);
            lnode.set_child_at(size, rnode.child_at(0));
            lnode.set_size(size + 1);
            for i in 1..rnode.size() {
                let key = rnode.key_at(i).to_vec();
                let child = rnode.child_at(i);
                let size = lnode.size();
                lnode.set_key_at(size, &key);
                lnode.set_child_at(size, child);
                lnode.set_size(size + 1);
            }
            moved_children = (0..rnode.size()).map(|i| rnode.child_at(i)).collect();
        }

        let deleted_id = rnode.page_id();
        let survivor_id = lnode.page_id();
        pnode.internal_shift_left(right_index);
        let parent_underflows = pnode.size() < pnode.min_size();

        Ok((deleted_id, survivor_id, moved_children, parent_underflows))
    }

    /*****************************************************************
     * Iteration
     *****************************************************************/

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(Arc::clone(&self.bpm), self.key_size));
        }
        let mut guard = self.bpm.read_page(root_id)?;
        drop(root_latch);

        loop {
            let (is_leaf, first_child) = {
                let node = self.node_ref(&guard);
                if node.is_leaf() {
                    (true, INVALID_PAGE_ID)
                } else {
                    (false, node.child_at(0))
                }
            };
            if is_leaf {
                if self.node_ref(&guard).size() == 0 {
                    return Ok(IndexIterator::end(Arc::clone(&self.bpm), self.key_size));
                }
                let page = self.bpm.fetch_page(guard.page_id())?;
                drop(guard);
                return Ok(IndexIterator::new(
                    Arc::clone(&self.bpm),
                    self.key_size,
                    page,
                    0,
                ));
            }
            let child = self.bpm.read_page(first_child)?;
            guard = child;
        }
    }

    /// Iterator positioned at `key`, or the end iterator when the key
    /// is absent.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator> {
        self.check_key(key)?;
        let Some(guard) = self.find_leaf(key)? else {
            return Ok(IndexIterator::end(Arc::clone(&self.bpm), self.key_size));
        };

        let position = {
            let node = self.node_ref(&guard);
            let pos = node.lower_bound(key, &self.comparator);
            if pos == node.size() || !self.comparator.compare(node.key_at(pos), key).is_eq() {
                None
            } else {
                Some(pos)
            }
        };
        let Some(position) = position else {
            return Ok(IndexIterator::end(Arc::clone(&self.bpm), self.key_size));
        };

        let page = self.bpm.fetch_page(guard.page_id())?;
        drop(guard);
        Ok(IndexIterator::new(
            Arc::clone(&self.bpm),
            self.key_size,
            page,
            position,
        ))
    }

    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(Arc::clone(&self.bpm), self.key_size)
    }
}
