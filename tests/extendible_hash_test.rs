//! Integration tests for the extendible hash table

use std::sync::Arc;
use std::thread;

use stratadb::container::ExtendibleHashTable;

#[test]
fn test_small_bucket_forces_split() {
    let table = ExtendibleHashTable::new(2);

    table.insert(4u64, "a").unwrap();
    table.insert(12u64, "b").unwrap();
    table.insert(8u64, "c").unwrap();

    // Three items cannot share one two-slot bucket, so at least one split
    // happened and the directory references at least two buckets.
    assert!(table.num_buckets() >= 2);
    assert!(table.num_buckets() <= 1 << table.global_depth());

    assert_eq!(table.find(&4), Some("a"));
    assert_eq!(table.find(&12), Some("b"));
    assert_eq!(table.find(&8), Some("c"));
}

#[test]
fn test_every_insert_retrievable() {
    let table = ExtendibleHashTable::new(4);

    for i in 0..500u64 {
        table.insert(i, i * 3).unwrap();
    }
    for i in 0..500u64 {
        assert_eq!(table.find(&i), Some(i * 3), "lost key {}", i);
    }
    assert_eq!(table.len(), 500);
}

#[test]
fn test_last_writer_wins() {
    let table = ExtendibleHashTable::new(4);

    for round in 0..3u64 {
        for i in 0..100u64 {
            table.insert(i, (round, i)).unwrap();
        }
    }
    for i in 0..100u64 {
        assert_eq!(table.find(&i), Some((2, i)));
    }
    assert_eq!(table.len(), 100);
}

#[test]
fn test_depth_queries() {
    let table = ExtendibleHashTable::new(2);
    assert_eq!(table.global_depth(), 0);
    assert_eq!(table.local_depth(0), 0);

    for i in 0..64u64 {
        table.insert(i, ()).unwrap();
    }

    let global = table.global_depth();
    assert!(global >= 1);
    for slot in 0..(1usize << global) {
        assert!(table.local_depth(slot) <= global);
    }
}

#[test]
fn test_remove_then_reinsert() {
    let table = ExtendibleHashTable::new(3);

    for i in 0..50u64 {
        table.insert(i, i as i64).unwrap();
    }
    for i in 0..50u64 {
        assert!(table.remove(&i));
        assert!(!table.remove(&i));
    }
    assert!(table.is_empty());

    for i in 0..50u64 {
        table.insert(i, -(i as i64)).unwrap();
        assert_eq!(table.find(&i), Some(-(i as i64)));
    }
}

#[test]
fn test_string_keys() {
    let table = ExtendibleHashTable::new(2);

    for i in 0..40u32 {
        table.insert(format!("page-{}", i), i).unwrap();
    }
    for i in 0..40u32 {
        assert_eq!(table.find(&format!("page-{}", i)), Some(i));
    }
    assert_eq!(table.find(&"page-99".to_string()), None);
}

#[test]
fn test_concurrent_readers_and_writers() {
    let table = Arc::new(ExtendibleHashTable::new(4));

    // Pre-populate a stable region that readers hammer while writers grow
    // the table.
    for i in 0..100u64 {
        table.insert(i, i).unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..2u64 {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            for i in 0..200u64 {
                table.insert(1000 + t * 1000 + i, i).unwrap();
            }
        }));
    }
    for _ in 0..2 {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            for _ in 0..5 {
                for i in 0..100u64 {
                    assert_eq!(table.find(&i), Some(i));
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.len(), 100 + 400);
}
