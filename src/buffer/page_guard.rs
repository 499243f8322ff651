use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::BufferPoolState;
use super::Page;

/// RAII guard holding a page pinned and read-latched.
///
/// Dropping the guard releases the latch and then unpins the page
/// through the buffer pool.
pub struct ReadPageGuard {
    page_id: PageId,
    pool: Arc<BufferPoolState>,
    /// Keeps the frame alive for the transmuted lock guard below
    _page: Arc<Page>,
    guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    /// `page` must be pinned on behalf of this guard; the guard assumes
    /// ownership of exactly one pin and releases it on drop.
    pub(crate) unsafe fn new(pool: Arc<BufferPoolState>, page: Arc<Page>) -> Self {
        let page_id = page.page_id();
        let guard = page.data.read();
        // The frame is kept alive via the Arc held alongside the guard.
        let guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(guard);
        Self {
            page_id,
            pool,
            _page: page,
            guard: Some(guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().expect("latch held until drop")[..]
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the latch before unpinning.
        self.guard.take();
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard holding a page pinned and write-latched.
///
/// Mutable access through `data_mut` marks the guard dirty; the page is
/// unpinned with that flag when the guard drops.
pub struct WritePageGuard {
    page_id: PageId,
    pool: Arc<BufferPoolState>,
    _page: Arc<Page>,
    guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    is_dirty: bool,
}

impl WritePageGuard {
    /// # Safety
    /// `page` must be pinned on behalf of this guard; the guard assumes
    /// ownership of exactly one pin and releases it on drop.
    pub(crate) unsafe fn new(pool: Arc<BufferPoolState>, page: Arc<Page>) -> Self {
        let page_id = page.page_id();
        let guard = page.data.write();
        let guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(guard);
        Self {
            page_id,
            pool,
            _page: page,
            guard: Some(guard),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().expect("latch held until drop")[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.guard.as_mut().expect("latch held until drop")[..]
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.pool.unpin_page(self.page_id, self.is_dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::super::BufferPoolManager;
    use crate::storage::disk::DiskManager;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn create_bpm() -> (Arc<BufferPoolManager>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (Arc::new(BufferPoolManager::new(10, 2, dm)), temp_file)
    }

    #[test]
    fn test_write_guard_marks_dirty_and_unpins() {
        let (bpm, _temp) = create_bpm();
        let page = bpm.new_page().unwrap();
        let page_id = page.page_id();
        assert_eq!(bpm.pin_count_of(page_id), Some(1));

        {
            let mut guard = bpm.write_page(page_id).unwrap();
            assert_eq!(bpm.pin_count_of(page_id), Some(2));
            guard.data_mut()[0] = 42;
            assert!(guard.is_dirty());
        }

        assert_eq!(bpm.pin_count_of(page_id), Some(1));
        assert!(bpm.unpin_page(page_id, false));
        assert_eq!(bpm.pin_count_of(page_id), Some(0));
    }

    #[test]
    fn test_read_guard_sees_written_data() {
        let (bpm, _temp) = create_bpm();
        let page = bpm.new_page().unwrap();
        let page_id = page.page_id();
        bpm.unpin_page(page_id, false);

        {
            let mut guard = bpm.write_page(page_id).unwrap();
            guard.data_mut()[100] = 7;
        }
        {
            let guard = bpm.read_page(page_id).unwrap();
            assert_eq!(guard.data()[100], 7);
        }
    }

    #[test]
    fn test_guards_outlive_manager_handle_clone() {
        let (bpm, _temp) = create_bpm();
        let page_id = {
            let mut guard = bpm.new_page_write().unwrap();
            guard.data_mut()[0] = 5;
            guard.page_id()
        };

        // A guard taken from a cloned handle unpins correctly.
        let bpm2 = Arc::clone(&bpm);
        {
            let guard = bpm2.read_page(page_id).unwrap();
            assert_eq!(guard.data()[0], 5);
        }
        assert_eq!(bpm.pin_count_of(page_id), Some(0));
    }
}
