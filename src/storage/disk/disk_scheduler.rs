use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{CairnError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// A queued page I/O request. Reads fill the buffer behind `data`;
/// writes consume it. Completion is signaled through `done`.
struct DiskRequest {
    is_write: bool,
    page_id: PageId,
    /// Must point at PAGE_SIZE valid bytes until `done` fires
    data: *mut u8,
    done: std::sync::mpsc::Sender<bool>,
}

// Safety: the submitting thread blocks on the completion channel, so the
// buffer outlives the worker's use of the pointer.
unsafe impl Send for DiskRequest {}

/// DiskScheduler funnels page I/O through a background worker thread fed
/// by a bounded queue. The buffer pool only uses the synchronous
/// wrappers, which block until the worker acknowledges the request.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns the worker thread over `disk_manager`.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker_handle = thread::spawn(move || Self::run_worker(dm, receiver, stop));

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Reads a page and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        let (tx, rx) = std::sync::mpsc::channel();
        self.submit(DiskRequest {
            is_write: false,
            page_id,
            data: data.as_mut_ptr(),
            done: tx,
        })?;
        Self::await_completion(rx)
    }

    /// Writes a page and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        let (tx, rx) = std::sync::mpsc::channel();
        // The worker only reads through the pointer for writes.
        self.submit(DiskRequest {
            is_write: true,
            page_id,
            data: data.as_ptr() as *mut u8,
            done: tx,
        })?;
        Self::await_completion(rx)
    }

    fn submit(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| CairnError::DiskScheduler(format!("failed to queue request: {}", e)))
    }

    fn await_completion(rx: std::sync::mpsc::Receiver<bool>) -> Result<()> {
        match rx.recv() {
            Ok(true) => Ok(()),
            Ok(false) => Err(CairnError::DiskScheduler("request failed".to_string())),
            Err(e) => Err(CairnError::DiskScheduler(format!(
                "completion channel closed: {}",
                e
            ))),
        }
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain what is still queued before exiting.
                while let Ok(request) = receiver.try_recv() {
                    Self::process(&disk_manager, request);
                }
                break;
            }
            match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(request) => Self::process(&disk_manager, request),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(disk_manager: &DiskManager, request: DiskRequest) {
        let ok = if request.is_write {
            // Safety: the submitter keeps the buffer alive until `done`.
            let data = unsafe { std::slice::from_raw_parts(request.data, PAGE_SIZE) };
            disk_manager.write_page(request.page_id, data).is_ok()
        } else {
            let data = unsafe { std::slice::from_raw_parts_mut(request.data, PAGE_SIZE) };
            disk_manager.read_page(request.page_id, data).is_ok()
        };
        let _ = request.done.send(ok);
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
