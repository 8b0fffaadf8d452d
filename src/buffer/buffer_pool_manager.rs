use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{
    FrameId, PageId, Result, StrataError, DEFAULT_BUCKET_SIZE, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::recovery::LogManager;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{Frame, LruKReplacer, ReadPageGuard, WritePageGuard};

/// State behind the pool latch: the page directory, the free list, and the
/// page-id allocator. Page 0 is reserved for the header page, so
/// allocation starts at 1.
struct PoolInner {
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: u32,
}

/// Shared pool state; page guards capture an `Arc` of this so their drop
/// path can unpin without holding a reference to the manager itself.
struct PoolState {
    frames: Vec<Arc<Frame>>,
    replacer: LruKReplacer,
    inner: Mutex<PoolInner>,
    disk_scheduler: DiskScheduler,
    /// Stored for future recovery integration; this layer never calls it.
    log_manager: Option<Arc<LogManager>>,
}

impl PoolState {
    /// Pops a free frame, or evicts one: write back a dirty victim, drop
    /// its directory entry, and hand back the zeroed frame.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(StrataError::BufferPoolFull)?;
        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            debug!(
                page_id = old_page_id.as_u32(),
                frame_id = frame_id.as_u32(),
                "bufferpool.evict.writeback"
            );
            let mut buf = [0u8; PAGE_SIZE];
            frame.copy_into(&mut buf);
            self.disk_scheduler.schedule_write_sync(old_page_id, &buf)?;
            frame.set_dirty(false);
        }

        inner.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }

    fn unpin_locked(&self, inner: &mut PoolInner, page_id: PageId, is_dirty: bool) -> bool {
        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer
                .set_evictable(frame_id, true)
                .expect("pool frame id within replacer bounds");
        }
        true
    }

    fn unpin(&self, page_id: PageId, is_dirty: bool) {
        let mut inner = self.inner.lock();
        self.unpin_locked(&mut inner, page_id, is_dirty);
    }
}

/// BufferPoolManager owns a fixed array of in-memory frames and mediates
/// all page I/O. The page directory is an extendible hash table, victim
/// selection is LRU-K, and every public operation holds the pool latch for
/// its full duration (disk I/O included).
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::build(pool_size, replacer_k, disk_manager, None)
    }

    /// As `new`, additionally storing a log manager handle for layers
    /// above; no log records are issued from the pool itself.
    pub fn new_with_log_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self::build(pool_size, replacer_k, disk_manager, Some(log_manager))
    }

    fn build(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(pool_size > 0, "pool_size must be positive");

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            replacer: LruKReplacer::new(pool_size, replacer_k),
            inner: Mutex::new(PoolInner {
                page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
                free_list,
                next_page_id: 1,
            }),
            disk_scheduler: DiskScheduler::new(disk_manager),
            log_manager,
        });

        Self { pool_size, state }
    }

    /// Allocates a fresh page in a zeroed frame, pinned at 1. The caller
    /// owns the pin and must pair it with one `unpin_page` (or take it
    /// over with `new_page_guard`).
    pub fn new_page(&self) -> Result<(PageId, Arc<Frame>)> {
        let state = &self.state;
        let mut inner = state.inner.lock();

        let frame_id = state.acquire_frame(&mut inner)?;
        let page_id = PageId::new(inner.next_page_id);
        inner.next_page_id += 1;

        let frame = &state.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.pin();

        inner.page_table.insert(page_id, frame_id)?;
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false)?;

        Ok((page_id, Arc::clone(frame)))
    }

    /// Fetches a page, pinning it. On a miss the page is read from disk
    /// into a free or evicted frame.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return Err(StrataError::InvalidPageId(page_id));
        }

        let state = &self.state;
        let mut inner = state.inner.lock();

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            let frame = &state.frames[frame_id.as_usize()];
            frame.pin();
            state.replacer.record_access(frame_id)?;
            state.replacer.set_evictable(frame_id, false)?;
            return Ok(Arc::clone(frame));
        }

        let frame_id = state.acquire_frame(&mut inner)?;
        let frame = &state.frames[frame_id.as_usize()];

        let mut buf = [0u8; PAGE_SIZE];
        state.disk_scheduler.schedule_read_sync(page_id, &mut buf)?;
        frame.fill_from(&buf);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        inner.page_table.insert(page_id, frame_id)?;
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false)?;

        Ok(Arc::clone(frame))
    }

    /// Releases one pin. Returns false when the page is not resident or
    /// its pin count is already zero. `is_dirty` is OR-ed into the frame's
    /// dirty bit; reaching pin count zero makes the frame evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = &self.state;
        let mut inner = state.inner.lock();
        state.unpin_locked(&mut inner, page_id, is_dirty)
    }

    /// Writes a resident page back to disk unconditionally and clears its
    /// dirty bit. Does not unpin. `Ok(false)` for the invalid id or a
    /// non-resident page.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let state = &self.state;
        let inner = state.inner.lock();
        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(false);
        };

        let frame = &state.frames[frame_id.as_usize()];
        let mut buf = [0u8; PAGE_SIZE];
        frame.copy_into(&mut buf);
        state.disk_scheduler.schedule_write_sync(page_id, &buf)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes back every resident dirty page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = &self.state;
        let _inner = state.inner.lock();

        for frame in &state.frames {
            let page_id = frame.page_id();
            if page_id != INVALID_PAGE_ID && frame.is_dirty() {
                let mut buf = [0u8; PAGE_SIZE];
                frame.copy_into(&mut buf);
                state.disk_scheduler.schedule_write_sync(page_id, &buf)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Drops a page from the pool and deallocates its id. A non-resident
    /// page counts as success; a pinned page returns `Ok(false)`.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let state = &self.state;
        let mut inner = state.inner.lock();

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            state.disk_scheduler.disk_manager().deallocate_page(page_id);
            return Ok(true);
        };

        let frame = &state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        if frame.is_dirty() {
            let mut buf = [0u8; PAGE_SIZE];
            frame.copy_into(&mut buf);
            state.disk_scheduler.schedule_write_sync(page_id, &buf)?;
        }

        inner.page_table.remove(&page_id);
        state.replacer.remove(frame_id)?;
        frame.reset();
        inner.free_list.push_back(frame_id);
        state.disk_scheduler.disk_manager().deallocate_page(page_id);

        Ok(true)
    }

    /// Fetches a page for shared read access; the guard's drop unpins it.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_page(page_id)?;
        let state = Arc::clone(&self.state);
        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, dirty| state.unpin(pid, dirty)),
            )
        };
        Ok(guard)
    }

    /// Fetches a page for exclusive write access; the guard's drop unpins
    /// it, dirty iff it was mutated.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_page(page_id)?;
        let state = Arc::clone(&self.state);
        let guard = unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, dirty| state.unpin(pid, dirty)),
            )
        };
        Ok(guard)
    }

    /// Allocates a fresh page and hands its single pin to a write guard.
    pub fn new_page_guard(&self) -> Result<WritePageGuard> {
        let (page_id, frame) = self.new_page()?;
        let state = Arc::clone(&self.state);
        let guard = unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, dirty| state.unpin(pid, dirty)),
            )
        };
        Ok(guard)
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = &self.state;
        let inner = state.inner.lock();
        inner
            .page_table
            .find(&page_id)
            .map(|frame_id| state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    pub fn log_manager(&self) -> Option<&Arc<LogManager>> {
        self.state.log_manager.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        (BufferPoolManager::new(pool_size, 2, dm), temp)
    }

    #[test]
    fn test_new_pool() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_new_page_pins_at_one() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, frame) = bpm.new_page().unwrap();
        assert_eq!(page_id, PageId::new(1));
        assert_eq!(frame.pin_count(), 1);
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        assert!(bpm.unpin_page(page_id, false));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        // Second unpin has nothing to release.
        assert!(!bpm.unpin_page(page_id, false));
    }

    #[test]
    fn test_page_ids_monotonic() {
        let (bpm, _temp) = create_bpm(5);
        for expected in 1..=3u32 {
            let (page_id, _) = bpm.new_page().unwrap();
            assert_eq!(page_id, PageId::new(expected));
            bpm.unpin_page(page_id, false);
        }
    }

    #[test]
    fn test_write_then_read_through_guards() {
        let (bpm, _temp) = create_bpm(10);
        let (page_id, _) = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);

        {
            let mut guard = bpm.write_page(page_id).unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
        }
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        let guard = bpm.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
        assert_eq!(guard.data()[100], 255);
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() {
        let (bpm, _temp) = create_bpm(3);

        let mut ids = Vec::new();
        for i in 0..3u8 {
            let mut guard = bpm.new_page_guard().unwrap();
            guard.data_mut()[0] = i + 1;
            ids.push(guard.page_id());
        }
        assert_eq!(bpm.free_frame_count(), 0);

        // A fourth page forces an eviction and a write-back.
        let (p4, _) = bpm.new_page().unwrap();
        bpm.unpin_page(p4, false);

        // Every original page still reads back its byte, whether it stayed
        // resident or went through disk.
        for (i, &pid) in ids.iter().enumerate() {
            let guard = bpm.read_page(pid).unwrap();
            assert_eq!(guard.data()[0], i as u8 + 1, "page {} lost its data", pid);
        }
    }

    #[test]
    fn test_pool_exhaustion() {
        let (bpm, _temp) = create_bpm(2);

        let (p1, _f1) = bpm.new_page().unwrap();
        let (p2, _f2) = bpm.new_page().unwrap();

        assert!(matches!(bpm.new_page(), Err(StrataError::BufferPoolFull)));
        assert!(matches!(
            bpm.fetch_page(PageId::new(50)),
            Err(StrataError::BufferPoolFull)
        ));

        // Releasing one pin frees a victim.
        bpm.unpin_page(p1, false);
        let (p3, _) = bpm.new_page().unwrap();
        assert_ne!(p3, p1);
        assert_ne!(p3, p2);
    }

    #[test]
    fn test_flush_page() {
        let (bpm, temp) = create_bpm(10);
        let (page_id, _) = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);

        {
            let mut guard = bpm.write_page(page_id).unwrap();
            guard.data_mut()[7] = 77;
        }
        assert!(bpm.flush_page(page_id).unwrap());
        assert!(!bpm.flush_page(PageId::new(999)).unwrap());
        assert!(!bpm.flush_page(INVALID_PAGE_ID).unwrap());

        // A fresh pool over the same file sees the flushed byte.
        drop(bpm);
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);
        let guard = bpm2.read_page(page_id).unwrap();
        assert_eq!(guard.data()[7], 77);
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(10);
        let (page_id, _) = bpm.new_page().unwrap();

        // Pinned: refused.
        assert!(!bpm.delete_page(page_id).unwrap());

        bpm.unpin_page(page_id, false);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Absent pages delete successfully.
        assert!(bpm.delete_page(PageId::new(321)).unwrap());
    }

    #[test]
    fn test_unpin_dirty_bit_sticks() {
        let (bpm, _temp) = create_bpm(3);
        let (page_id, frame) = bpm.new_page().unwrap();

        frame.data_mut()[0] = 5;
        bpm.unpin_page(page_id, true);

        // A clean unpin after a dirty one must not clear the bit.
        bpm.fetch_page(page_id).unwrap();
        bpm.unpin_page(page_id, false);
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_frames_partitioned_between_free_list_and_table() {
        let (bpm, _temp) = create_bpm(5);

        let mut pages = Vec::new();
        for _ in 0..3 {
            let (pid, _) = bpm.new_page().unwrap();
            bpm.unpin_page(pid, false);
            pages.push(pid);
        }

        assert_eq!(bpm.free_frame_count(), 2);
        for pid in &pages {
            assert!(bpm.get_pin_count(*pid).is_some());
        }

        bpm.delete_page(pages[0]).unwrap();
        assert_eq!(bpm.free_frame_count(), 3);
        assert_eq!(bpm.get_pin_count(pages[0]), None);
    }
}
