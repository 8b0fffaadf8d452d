use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::Frame;

/// Invoked exactly once when a guard is dropped: unpins the page, passing
/// whether the guard mutated it.
type ReleaseFn = Box<dyn FnOnce(PageId, bool) + Send>;

/// RAII guard for read access to a pinned page. Dropping the guard unpins
/// the page without marking it dirty.
pub struct ReadPageGuard {
    page_id: PageId,
    /// Declared before `_frame` so the lock is released before the frame
    /// reference it points into.
    data: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>,
    /// Keeps the frame alive for the transmuted data guard above.
    _frame: Arc<Frame>,
    release: Option<ReleaseFn>,
}

impl ReadPageGuard {
    /// # Safety
    /// `frame` must stay pinned until the guard drops; the `'static`
    /// lifetime on the data lock is backed by the `Arc` held alongside it.
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Frame>, release: ReleaseFn) -> Self {
        let data = frame.raw_data().read();
        let data: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(data);
        Self {
            page_id,
            data,
            _frame: frame,
            release: Some(release),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.page_id, false);
        }
    }
}

/// RAII guard for write access to a pinned page. Dropping the guard unpins
/// the page, reporting it dirty iff `data_mut` was called.
pub struct WritePageGuard {
    page_id: PageId,
    data: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    _frame: Arc<Frame>,
    release: Option<ReleaseFn>,
    dirty: bool,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Frame>, release: ReleaseFn) -> Self {
        let data = frame.raw_data().write();
        let data: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(data);
        Self {
            page_id,
            data: Some(data),
            _frame: frame,
            release: Some(release),
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().unwrap()[..]
    }

    /// Mutable page bytes; marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Release the data latch before unpinning.
        self.data.take();
        if let Some(release) = self.release.take() {
            release(self.page_id, self.dirty);
        }
    }
}
