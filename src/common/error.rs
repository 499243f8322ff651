use thiserror::Error;

use super::types::{FrameId, PageId};

/// Database error types
#[derive(Error, Debug)]
pub enum CairnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Invalid frame ID: {0}")]
    InvalidFrameId(FrameId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid index configuration: {0}")]
    IndexConfig(String),
}

pub type Result<T> = std::result::Result<T, CairnError>;
