use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// A buffer frame and the page image it holds.
///
/// The `data` lock doubles as the page latch: shared acquisition is a
/// read latch, exclusive acquisition is a write latch. Pin count and
/// dirty flag are adjusted by the buffer pool; a page with a non-zero
/// pin count is never evicted, and a dirty page is written back before
/// its frame is reused.
pub struct Page {
    /// The frame ID (index in the buffer pool)
    frame_id: FrameId,
    /// The page ID stored in this frame (INVALID_PAGE_ID if empty)
    page_id: RwLock<PageId>,
    /// Number of active users of this page
    pin_count: AtomicU32,
    /// Whether the in-memory image differs from disk
    is_dirty: AtomicBool,
    /// Page contents; the lock is the page latch (pub(crate) for guards)
    pub(crate) data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Page {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: RwLock::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        *self.page_id.read()
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        *self.page_id.write() = page_id;
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    /// Returns None if the pin count was already 0.
    pub(crate) fn unpin(&self) -> Option<u32> {
        loop {
            let current = self.pin_count.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if self
                .pin_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Takes the page latch in shared mode for the guard's lifetime.
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Takes the page latch in exclusive mode for the guard's lifetime.
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Copies `data` into the frame. Takes the latch exclusively.
    pub(crate) fn copy_from(&self, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut guard = self.data.write();
        guard.copy_from_slice(data);
    }

    /// Copies the frame contents into `data`. Takes the latch shared.
    pub(crate) fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let guard = self.data.read();
        data.copy_from_slice(&**guard);
    }

    /// Resets the frame to its initial state: invalid page id, pin count
    /// zero, clean, zeroed memory.
    pub(crate) fn reset(&self) {
        *self.page_id.write() = INVALID_PAGE_ID;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_new() {
        let page = Page::new(FrameId::new(0));
        assert_eq!(page.frame_id(), FrameId::new(0));
        assert_eq!(page.page_id(), INVALID_PAGE_ID);
        assert_eq!(page.pin_count(), 0);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_page_pin_unpin() {
        let page = Page::new(FrameId::new(0));

        assert_eq!(page.pin(), 1);
        assert_eq!(page.pin(), 2);
        assert_eq!(page.pin_count(), 2);

        assert_eq!(page.unpin(), Some(1));
        assert_eq!(page.unpin(), Some(0));
        assert_eq!(page.unpin(), None);
    }

    #[test]
    fn test_page_dirty_flag() {
        let page = Page::new(FrameId::new(0));

        assert!(!page.is_dirty());
        page.set_dirty(true);
        assert!(page.is_dirty());
        page.set_dirty(false);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_page_copy_roundtrip() {
        let page = Page::new(FrameId::new(0));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[PAGE_SIZE - 1] = 7;
        page.copy_from(&data);

        let mut out = [0u8; PAGE_SIZE];
        page.copy_to(&mut out);
        assert_eq!(out[0], 42);
        assert_eq!(out[PAGE_SIZE - 1], 7);
    }

    #[test]
    fn test_page_reset() {
        let page = Page::new(FrameId::new(3));

        page.set_page_id(PageId::new(5));
        page.pin();
        page.set_dirty(true);
        let mut data = [1u8; PAGE_SIZE];
        page.copy_from(&data);

        page.reset();

        assert_eq!(page.page_id(), INVALID_PAGE_ID);
        assert_eq!(page.pin_count(), 0);
        assert!(!page.is_dirty());
        page.copy_to(&mut data);
        assert_eq!(data[0], 0);
    }
}
