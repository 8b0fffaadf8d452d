use thiserror::Error;

use super::types::{FrameId, PageId};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Invalid frame ID: {0}")]
    InvalidFrameId(FrameId),

    #[error("Frame {0} is not evictable")]
    FrameNotEvictable(FrameId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Hash depth exhausted: keys collide on all hash bits")]
    HashDepthExhausted,

    #[error("Header page has no free record slots")]
    HeaderFull,

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Corrupted structure: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, StrataError>;
