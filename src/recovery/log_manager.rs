use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{Lsn, INVALID_LSN};

/// Write-ahead-log sink placeholder. The buffer pool stores a handle and
/// passes it through; no log records are produced by the storage core yet.
pub struct LogManager {
    next_lsn: AtomicU64,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            next_lsn: AtomicU64::new(INVALID_LSN + 1),
        }
    }

    /// Hands out the next log sequence number.
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
