//! Stratadb - the storage-engine core of a disk-oriented RDBMS.
//!
//! The crate provides the page-management and indexing substrate that
//! query execution, transactions, and recovery would be built on:
//!
//! - **Buffer Pool** (`buffer`): a fixed array of in-memory frames fronting
//!   the disk. `BufferPoolManager` mediates all page I/O, `LruKReplacer`
//!   picks eviction victims by backward k-distance, and RAII page guards
//!   pair every fetch with exactly one unpin.
//! - **Containers** (`container`): `ExtendibleHashTable`, a
//!   directory-doubling hash table that also serves as the buffer pool's
//!   page directory.
//! - **Storage** (`storage`): `DiskManager` for page-granular file I/O,
//!   `DiskScheduler` for funneling requests through a worker thread, and
//!   the header page mapping index names to root pages.
//! - **Index** (`index`): `BPlusTree`, a disk-backed B+Tree whose nodes
//!   are buffer-pool pages, with an injected key comparator and a
//!   leaf-chain iterator.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratadb::buffer::BufferPoolManager;
//! use stratadb::common::{PageId, RecordId, SlotId, Transaction};
//! use stratadb::index::{BPlusTree, IntegerComparator};
//! use stratadb::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! let mut index = BPlusTree::new(
//!     "orders_pk",
//!     bpm,
//!     Arc::new(IntegerComparator),
//!     4,    // key width in bytes
//!     None, // fanouts computed from the page size
//!     None,
//! )
//! .unwrap();
//!
//! let txn = Transaction::new();
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! index.insert(&42u32.to_le_bytes(), rid, &txn).unwrap();
//! assert_eq!(index.get_value(&42u32.to_le_bytes(), &txn).unwrap(), vec![rid]);
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod recovery;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{PageId, RecordId, Result, SlotId, StrataError, Transaction};
