use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, PAGE_SIZE};

/// DiskManager reads and writes fixed-size page images in a single
/// database file. A page's byte offset is its id times PAGE_SIZE; page 0
/// is the header page. Reads past the end of the file (or into a hole)
/// come back zero-filled, so fresh pages look blank without any explicit
/// formatting step.
pub struct DiskManager {
    /// Exclusive access to the file cursor
    file: Mutex<File>,
    db_path: PathBuf,
    /// High-water mark of pages touched by writes
    num_pages: AtomicU32,
    num_reads: AtomicU32,
    num_writes: AtomicU32,
    /// Pages released back by the buffer pool (bookkeeping only; ids are
    /// not recycled)
    num_deallocated: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `db_path`, creating it if necessary.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file: Mutex::new(file),
            db_path,
            num_pages: AtomicU32::new(num_pages),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
            num_deallocated: AtomicU32::new(0),
        })
    }

    /// Reads a page into `data`, zero-filling anything the file does not
    /// cover yet.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        let byte_offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        let mut read = 0;
        while read < PAGE_SIZE {
            let n = file.read(&mut data[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        data[read..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page image from `data` and flushes it.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        let byte_offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        self.num_pages.fetch_max(page_id.as_u32() + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Releases a page id on disk. Ids are not reused; this only keeps a
    /// count for introspection.
    pub fn deallocate_page(&self, _page_id: PageId) {
        self.num_deallocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn num_deallocated(&self) -> u32 {
        self.num_deallocated.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}
