use std::sync::Arc;

use crate::buffer::{BufferPoolManager, Page};
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::BTreeNodeRef;

/// Cursor over the B+ tree's leaf chain in key order.
///
/// The iterator keeps exactly one page pinned (never latched between
/// calls): it pins its leaf on creation, re-pins the successor when it
/// crosses a leaf boundary, and unpins on drop. It is not shared across
/// threads, but stays valid while concurrent readers traverse the tree.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    key_size: usize,
    /// Pinned current leaf; None marks the end iterator
    page: Option<Arc<Page>>,
    position: usize,
}

impl IndexIterator {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        key_size: usize,
        page: Arc<Page>,
        position: usize,
    ) -> Self {
        Self {
            bpm,
            key_size,
            page: Some(page),
            position,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>, key_size: usize) -> Self {
        Self {
            bpm,
            key_size,
            page: None,
            position: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.page.is_none()
    }

    /// The entry under the cursor, read under a short shared latch.
    pub fn current(&self) -> Option<(Vec<u8>, RecordId)> {
        let page = self.page.as_ref()?;
        let data = page.read_data();
        let node = BTreeNodeRef::new(&data[..], self.key_size);
        if self.position >= node.size() {
            return None;
        }
        Some((node.key_at(self.position).to_vec(), node.rid_at(self.position)))
    }

    /// Steps to the next entry, following the leaf chain at the end of a
    /// leaf and becoming the end iterator after the last one.
    pub fn advance(&mut self) -> Result<()> {
        let Some(page) = self.page.as_ref() else {
            return Ok(());
        };

        let (size, next) = {
            let data = page.read_data();
            let node = BTreeNodeRef::new(&data[..], self.key_size);
            (node.size(), node.next_page_id())
        };

        self.position += 1;
        if self.position < size {
            return Ok(());
        }

        let old_page_id = page.page_id();
        if next == INVALID_PAGE_ID {
            self.page = None;
            self.position = 0;
            self.bpm.unpin_page(old_page_id, false);
            return Ok(());
        }

        // Pin the successor before letting go of the current leaf.
        let next_page = self.bpm.fetch_page(next)?;
        self.bpm.unpin_page(old_page_id, false);
        self.page = Some(next_page);
        self.position = 0;
        Ok(())
    }

    pub fn equals(&self, other: &IndexIterator) -> bool {
        if self.position != other.position {
            return false;
        }
        match (&self.page, &other.page) {
            (None, None) => true,
            (Some(a), Some(b)) => a.page_id() == b.page_id(),
            _ => false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page
            .as_ref()
            .map(|p| p.page_id())
            .unwrap_or(INVALID_PAGE_ID)
    }
}

impl Drop for IndexIterator {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.bpm.unpin_page(page.page_id(), false);
        }
    }
}

impl Iterator for IndexIterator {
    type Item = (Vec<u8>, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current()?;
        // Traversal errors surface as an early end of iteration.
        if self.advance().is_err() {
            if let Some(page) = self.page.take() {
                self.bpm.unpin_page(page.page_id(), false);
            }
        }
        Some(current)
    }
}
