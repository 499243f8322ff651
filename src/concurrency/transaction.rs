use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::buffer::WritePageGuard;
use crate::common::PageId;

/// Owned write guard over an index's root-id latch. Stored at the head
/// of a transaction's page set so that the uniform FIFO release drops
/// the root latch at the right point.
pub struct RootLatchGuard {
    /// Keeps the latch alive for the transmuted guard below
    _owner: Arc<RwLock<PageId>>,
    guard: Option<RwLockWriteGuard<'static, PageId>>,
}

impl RootLatchGuard {
    /// # Safety
    /// The guard borrows the lock inside `owner`; holding the Arc
    /// alongside keeps that borrow valid for the guard's lifetime.
    pub(crate) unsafe fn new(owner: Arc<RwLock<PageId>>) -> Self {
        let guard = owner.write();
        let guard: RwLockWriteGuard<'static, PageId> = std::mem::transmute(guard);
        Self {
            _owner: owner,
            guard: Some(guard),
        }
    }

    pub fn get(&self) -> PageId {
        **self.guard.as_ref().expect("latch held until drop")
    }

    pub fn set(&mut self, page_id: PageId) {
        **self.guard.as_mut().expect("latch held until drop") = page_id;
    }
}

impl Drop for RootLatchGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}

/// One entry of a traversal's latched page set.
pub enum PageSetEntry {
    /// Sentinel holding the root-id latch
    Root(RootLatchGuard),
    /// An exclusively latched, pinned page
    Page(WritePageGuard),
}

/// Per-operation context for B+ tree mutations.
///
/// Carries the FIFO of latched pages accumulated during a pessimistic
/// descent (head may be the root-latch sentinel) and the set of pages
/// whose deletion is deferred until every latch is released. The caller
/// creates one per operation and disposes of it afterwards.
#[derive(Default)]
pub struct Transaction {
    page_set: Vec<PageSetEntry>,
    deleted_pages: HashSet<PageId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_root(&mut self, guard: RootLatchGuard) {
        self.page_set.push(PageSetEntry::Root(guard));
    }

    pub fn push_page(&mut self, guard: WritePageGuard) {
        self.page_set.push(PageSetEntry::Page(guard));
    }

    /// Releases every held latch in FIFO order (root latch first when
    /// present), unpinning each page with the dirtiness its guard
    /// accumulated.
    pub fn release_all(&mut self) {
        self.page_set.drain(..);
    }

    pub fn page_set_len(&self) -> usize {
        self.page_set.len()
    }

    pub fn page_at(&self, index: usize) -> Option<&WritePageGuard> {
        match self.page_set.get(index) {
            Some(PageSetEntry::Page(guard)) => Some(guard),
            _ => None,
        }
    }

    pub fn page_at_mut(&mut self, index: usize) -> Option<&mut WritePageGuard> {
        match self.page_set.get_mut(index) {
            Some(PageSetEntry::Page(guard)) => Some(guard),
            _ => None,
        }
    }

    pub fn last_page_mut(&mut self) -> Option<&mut WritePageGuard> {
        match self.page_set.last_mut() {
            Some(PageSetEntry::Page(guard)) => Some(guard),
            _ => None,
        }
    }

    /// Mutable access to two distinct page entries at once.
    pub fn pages_pair_mut(
        &mut self,
        first: usize,
        second: usize,
    ) -> Option<(&mut WritePageGuard, &mut WritePageGuard)> {
        if first >= second || second >= self.page_set.len() {
            return None;
        }
        let (head, tail) = self.page_set.split_at_mut(second);
        match (&mut head[first], &mut tail[0]) {
            (PageSetEntry::Page(a), PageSetEntry::Page(b)) => Some((a, b)),
            _ => None,
        }
    }

    /// Finds the latched page holding `page_id`, searching from the
    /// deepest entry.
    pub fn find_page_mut(&mut self, page_id: PageId) -> Option<&mut WritePageGuard> {
        self.page_set.iter_mut().rev().find_map(|entry| match entry {
            PageSetEntry::Page(guard) if guard.page_id() == page_id => Some(guard),
            _ => None,
        })
    }

    pub fn root_guard_mut(&mut self) -> Option<&mut RootLatchGuard> {
        self.page_set.iter_mut().find_map(|entry| match entry {
            PageSetEntry::Root(guard) => Some(guard),
            _ => None,
        })
    }

    /// Defers deletion of `page_id` until after the latches drop.
    pub fn add_deleted_page(&mut self, page_id: PageId) {
        self.deleted_pages.insert(page_id);
    }

    /// Hands back the deferred deletions, leaving the set empty.
    pub fn take_deleted_pages(&mut self) -> Vec<PageId> {
        self.deleted_pages.drain().collect()
    }
}
