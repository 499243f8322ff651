use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{
    CairnError, FrameId, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE, PAGE_TABLE_BUCKET_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{LruKReplacer, Page, ReadPageGuard, WritePageGuard};

/// State guarded by the pool latch. The page table and replacer carry
/// their own locks but are only touched by pool code paths, so the pool
/// latch serializes all metadata changes.
struct PoolMeta {
    /// Frames not currently holding a page
    free_list: VecDeque<FrameId>,
    /// Next page id to hand out; page 0 is reserved for the header page
    next_page_id: u32,
}

/// Shared pool state. Page guards keep an Arc to it so that dropping a
/// guard can unpin through the pool after the caller has let go of the
/// manager handle.
pub(crate) struct BufferPoolState {
    pool_size: usize,
    frames: Vec<Arc<Page>>,
    latch: Mutex<PoolMeta>,
    /// Page table: maps page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolState {
    /// Allocates a new zeroed page and returns it pinned.
    fn new_page(&self) -> Result<Arc<Page>> {
        let mut meta = self.latch.lock();

        let frame_id = self.acquire_frame(&mut meta)?;
        let page_id = PageId::new(meta.next_page_id);
        meta.next_page_id += 1;

        let frame = &self.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;
        frame.pin();

        Ok(Arc::clone(frame))
    }

    /// Fetches a page, reading it from disk if it is not resident.
    /// Returns the page pinned.
    fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        if page_id == INVALID_PAGE_ID {
            return Err(CairnError::InvalidPageId(page_id));
        }
        let mut meta = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            frame.pin();
            self.replacer.record_access(frame_id)?;
            self.replacer.set_evictable(frame_id, false)?;
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut meta)?;
        let frame = &self.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;
        frame.copy_from(&data);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;

        Ok(Arc::clone(frame))
    }

    /// Drops one pin on a page, ORing `is_dirty` into its dirty flag.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _meta = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        let Some(remaining) = frame.unpin() else {
            return false;
        };
        if is_dirty {
            frame.set_dirty(true);
        }
        if remaining == 0 {
            let _ = self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Obtains a reusable frame: free list first, then the replacer's
    /// victim. A dirty victim is written back before its frame is
    /// handed out; the old mapping is removed either way.
    fn acquire_frame(&self, meta: &mut PoolMeta) -> Result<FrameId> {
        if let Some(frame_id) = meta.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(CairnError::BufferPoolFull);
        };
        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
        }
        self.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}

/// BufferPoolManager caches disk pages in a fixed array of frames.
///
/// Pages come back pinned from `new_page`/`fetch_page` and every such
/// call must be balanced by exactly one `unpin_page`. Frames are
/// acquired from the free list first, then by evicting the LRU-K
/// victim; dirty victims are written back before their frame is reused.
/// The pool latch is held across that write-back and the replacement
/// read, trading I/O concurrency for a single-mapping guarantee.
pub struct BufferPoolManager {
    state: Arc<BufferPoolState>,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames with LRU-`k` replacement.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Page::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            state: Arc::new(BufferPoolState {
                pool_size,
                frames,
                latch: Mutex::new(PoolMeta {
                    free_list,
                    next_page_id: 1,
                }),
                page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
                replacer: LruKReplacer::new(k, pool_size),
                disk_scheduler: DiskScheduler::new(disk_manager),
            }),
        }
    }

    /// Allocates a new zeroed page and returns it pinned.
    pub fn new_page(&self) -> Result<Arc<Page>> {
        self.state.new_page()
    }

    /// Fetches a page, reading it from disk if it is not resident.
    /// Returns the page pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        self.state.fetch_page(page_id)
    }

    /// Drops one pin on a page, ORing `is_dirty` into its dirty flag.
    /// Returns false if the page is not resident or was not pinned.
    /// A page whose pin count reaches zero becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin_page(page_id, is_dirty)
    }

    /// Writes a page to disk regardless of its dirty flag and clears the
    /// flag. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(CairnError::InvalidPageId(page_id));
        }
        let state = &self.state;
        let _meta = state.latch.lock();

        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        state.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes every frame holding a valid page to disk and clears the
    /// dirty flags.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = &self.state;
        let _meta = state.latch.lock();

        for frame in &state.frames {
            let page_id = frame.page_id();
            if page_id == INVALID_PAGE_ID {
                continue;
            }
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            state.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.set_dirty(false);
        }
        Ok(())
    }

    /// Drops a page from the pool and deallocates its disk id. Returns
    /// true if the page was absent or deleted, false if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let state = &self.state;
        let mut meta = state.latch.lock();

        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        state.replacer.remove(frame_id)?;
        state.page_table.remove(&page_id);
        meta.free_list.push_back(frame_id);
        frame.reset();
        state.disk_scheduler.disk_manager().deallocate_page(page_id);
        Ok(true)
    }

    /// Fetches `page_id` for shared access, returning a pinned,
    /// read-latched guard.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let page = self.state.fetch_page(page_id)?;
        Ok(unsafe { ReadPageGuard::new(Arc::clone(&self.state), page) })
    }

    /// Fetches `page_id` for exclusive access, returning a pinned,
    /// write-latched guard.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let page = self.state.fetch_page(page_id)?;
        Ok(unsafe { WritePageGuard::new(Arc::clone(&self.state), page) })
    }

    /// Allocates a new page and returns it write-latched.
    pub fn new_page_write(&self) -> Result<WritePageGuard> {
        let page = self.state.new_page()?;
        Ok(unsafe { WritePageGuard::new(Arc::clone(&self.state), page) })
    }

    pub fn pool_size(&self) -> usize {
        self.state.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.latch.lock().free_list.len()
    }

    /// Pin count of a resident page, or None if the page is not resident.
    pub fn pin_count_of(&self, page_id: PageId) -> Option<u32> {
        let state = &self.state;
        let _meta = state.latch.lock();
        state
            .page_table
            .find(&page_id)
            .map(|frame_id| state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.state.disk_scheduler.disk_manager()
    }
}
