//! Integration tests for the buffer pool manager

use std::sync::Arc;

use stratadb::buffer::BufferPoolManager;
use stratadb::common::{PageId, StrataError, PAGE_SIZE};
use stratadb::storage::disk::DiskManager;
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
    let temp = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
    (BufferPoolManager::new(pool_size, 2, dm), temp)
}

#[test]
fn test_dirty_page_survives_eviction() {
    let (bpm, _temp) = create_bpm(3);

    // Fill the pool with three pages carrying distinct payloads.
    let mut pages = Vec::new();
    for i in 0..3u8 {
        let (page_id, frame) = bpm.new_page().unwrap();
        frame.data_mut()[0] = 0x10 + i;
        frame.data_mut()[PAGE_SIZE - 1] = i;
        pages.push(page_id);
    }

    // First page unpinned dirty, second clean, third stays pinned.
    assert!(bpm.unpin_page(pages[0], true));
    assert!(bpm.unpin_page(pages[1], false));
    assert_eq!(bpm.free_frame_count(), 0);

    // Allocating another page evicts the oldest unpinned frame (the
    // dirty one), which must be written back first.
    let (p4, _frame) = bpm.new_page().unwrap();
    assert_ne!(p4, pages[0]);

    // Fetching the evicted page re-reads it from disk, byte-identical.
    bpm.unpin_page(p4, false);
    let guard = bpm.read_page(pages[0]).unwrap();
    assert_eq!(guard.data()[0], 0x10);
    assert_eq!(guard.data()[PAGE_SIZE - 1], 0);
}

#[test]
fn test_unpin_semantics() {
    let (bpm, _temp) = create_bpm(5);

    let (page_id, _frame) = bpm.new_page().unwrap();
    assert_eq!(bpm.get_pin_count(page_id), Some(1));

    bpm.fetch_page(page_id).unwrap();
    assert_eq!(bpm.get_pin_count(page_id), Some(2));

    assert!(bpm.unpin_page(page_id, false));
    assert!(bpm.unpin_page(page_id, false));
    assert_eq!(bpm.get_pin_count(page_id), Some(0));

    // Pin count is already zero.
    assert!(!bpm.unpin_page(page_id, false));
    // Unknown page.
    assert!(!bpm.unpin_page(PageId::new(777), false));
}

#[test]
fn test_all_frames_pinned_fails() {
    let (bpm, _temp) = create_bpm(2);

    let (_p1, _f1) = bpm.new_page().unwrap();
    let (_p2, _f2) = bpm.new_page().unwrap();

    assert!(matches!(bpm.new_page(), Err(StrataError::BufferPoolFull)));
}

#[test]
fn test_fetch_miss_reads_from_disk() {
    let temp = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp.path()).unwrap());

    // Seed page 9 on disk behind the pool's back.
    let mut raw = [0u8; PAGE_SIZE];
    raw[3] = 0x5A;
    dm.write_page(PageId::new(9), &raw).unwrap();

    let bpm = BufferPoolManager::new(4, 2, dm);
    let guard = bpm.read_page(PageId::new(9)).unwrap();
    assert_eq!(guard.data()[3], 0x5A);
}

#[test]
fn test_delete_page_lifecycle() {
    let (bpm, _temp) = create_bpm(4);

    let (page_id, _frame) = bpm.new_page().unwrap();

    // Refused while pinned.
    assert!(!bpm.delete_page(page_id).unwrap());

    bpm.unpin_page(page_id, true);
    assert!(bpm.delete_page(page_id).unwrap());
    assert_eq!(bpm.get_pin_count(page_id), None);
    assert_eq!(bpm.free_frame_count(), 4);

    // Deleting a page that was never resident is a success.
    assert!(bpm.delete_page(PageId::new(500)).unwrap());
}

#[test]
fn test_flush_all_pages() {
    let (bpm, temp) = create_bpm(4);

    let mut pages = Vec::new();
    for i in 0..3u8 {
        let (page_id, frame) = bpm.new_page().unwrap();
        frame.data_mut()[0] = 0xA0 + i;
        bpm.unpin_page(page_id, true);
        pages.push(page_id);
    }
    bpm.flush_all_pages().unwrap();

    // A second pool over the same file sees everything.
    drop(bpm);
    let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
    let bpm2 = BufferPoolManager::new(4, 2, dm);
    for (i, &page_id) in pages.iter().enumerate() {
        let guard = bpm2.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 0xA0 + i as u8);
    }
}

#[test]
fn test_guard_round_trip_many_pages() {
    let (bpm, _temp) = create_bpm(5);

    // Twenty pages through a five-frame pool: every page cycles through
    // eviction at least once.
    let mut pages = Vec::new();
    for i in 0..20u32 {
        let mut guard = bpm.new_page_guard().unwrap();
        guard.data_mut()[..4].copy_from_slice(&i.to_le_bytes());
        pages.push(guard.page_id());
    }

    for (i, &page_id) in pages.iter().enumerate() {
        let guard = bpm.read_page(page_id).unwrap();
        let got = u32::from_le_bytes(guard.data()[..4].try_into().unwrap());
        assert_eq!(got, i as u32, "page {} corrupted", page_id);
    }
}

#[test]
fn test_free_list_and_page_table_partition_frames() {
    let (bpm, _temp) = create_bpm(6);

    let mut resident = Vec::new();
    for _ in 0..4 {
        let (page_id, _) = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);
        resident.push(page_id);
    }

    let in_table = resident
        .iter()
        .filter(|p| bpm.get_pin_count(**p).is_some())
        .count();
    assert_eq!(in_table + bpm.free_frame_count(), 6);

    bpm.delete_page(resident[1]).unwrap();
    bpm.delete_page(resident[3]).unwrap();
    let in_table = resident
        .iter()
        .filter(|p| bpm.get_pin_count(**p).is_some())
        .count();
    assert_eq!(in_table, 2);
    assert_eq!(in_table + bpm.free_frame_count(), 6);
}
