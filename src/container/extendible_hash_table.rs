use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{Result, StrataError};

/// Width of the hash in bits. A bucket at this local depth already
/// distinguishes every hash bit, so a further split cannot separate its
/// items and the insert is rejected instead of retried forever.
const MAX_DEPTH: usize = 64;

/// A single bucket: a bounded list of key/value pairs plus the number of
/// hash bits this bucket distinguishes.
struct Bucket<K, V> {
    depth: usize,
    max_size: usize,
    items: Mutex<Vec<(K, V)>>,
}

impl<K: Eq + Clone, V: Clone> Bucket<K, V> {
    fn new(depth: usize, max_size: usize) -> Self {
        Self {
            depth,
            max_size,
            items: Mutex::new(Vec::new()),
        }
    }

    fn find(&self, key: &K) -> Option<V> {
        let items = self.items.lock();
        items.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    fn remove(&self, key: &K) -> bool {
        let mut items = self.items.lock();
        if let Some(pos) = items.iter().position(|(k, _)| k == key) {
            items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Inserts or overwrites. Returns false when the bucket is full and the
    /// key is not already present.
    fn insert(&self, key: K, value: V) -> bool {
        let mut items = self.items.lock();
        if let Some(entry) = items.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
            return true;
        }
        if items.len() >= self.max_size {
            return false;
        }
        items.push((key, value));
        true
    }

    fn snapshot(&self) -> Vec<(K, V)> {
        self.items.lock().clone()
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

struct Directory<K, V> {
    global_depth: usize,
    /// `2^global_depth` slots; multiple slots may reference the same bucket.
    buckets: Vec<Arc<Bucket<K, V>>>,
}

/// Extendible hash table with directory doubling.
///
/// The directory holds `2^global_depth` shared bucket references; each
/// bucket carries a local depth `d <= global_depth`, and exactly the slots
/// whose low `d` index bits match the bucket's hash prefix point at it.
/// Splitting a full bucket allocates two successors at depth `d + 1`,
/// repartitions the items on hash bit `d`, and redirects only the slots
/// that referenced the old bucket.
///
/// Doubles as the buffer pool's `page_id -> frame_id` directory.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    dir: Mutex<Directory<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> ExtendibleHashTable<K, V> {
    /// Creates a table with a single depth-0 bucket holding up to
    /// `bucket_size` items.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket_size must be positive");
        Self {
            bucket_size,
            dir: Mutex::new(Directory {
                global_depth: 0,
                buckets: vec![Arc::new(Bucket::new(0, bucket_size))],
            }),
        }
    }

    fn hash_of(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Directory slot for a key: the low `global_depth` bits of its hash.
    fn slot_of(global_depth: usize, key: &K) -> usize {
        let mask = if global_depth >= MAX_DEPTH {
            u64::MAX
        } else {
            (1u64 << global_depth) - 1
        };
        (Self::hash_of(key) & mask) as usize
    }

    /// Looks up a key, returning a clone of its value.
    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.dir.lock();
        dir.buckets[Self::slot_of(dir.global_depth, key)].find(key)
    }

    /// Removes a key. Returns whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let dir = self.dir.lock();
        dir.buckets[Self::slot_of(dir.global_depth, key)].remove(key)
    }

    /// Inserts a key/value pair, overwriting the value of an existing key.
    /// Splits the target bucket (doubling the directory when its local
    /// depth equals the global depth) until the insert fits. Fails only
    /// when distinct keys collide on all hash bits.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut dir = self.dir.lock();
        loop {
            let slot = Self::slot_of(dir.global_depth, &key);
            let bucket = Arc::clone(&dir.buckets[slot]);

            if bucket.insert(key.clone(), value.clone()) {
                return Ok(());
            }

            if bucket.depth >= MAX_DEPTH {
                return Err(StrataError::HashDepthExhausted);
            }

            if bucket.depth == dir.global_depth {
                // Mirror every slot so each bucket is referenced from both
                // halves, then distinguish one more bit.
                let old_len = dir.buckets.len();
                for i in 0..old_len {
                    let image = Arc::clone(&dir.buckets[i]);
                    dir.buckets.push(image);
                }
                dir.global_depth += 1;
                debug!(
                    global_depth = dir.global_depth,
                    "hashtable.directory.double"
                );
            }

            Self::split_bucket(&mut dir, &bucket, self.bucket_size);
        }
    }

    /// Splits `old` into two buckets at depth `old.depth + 1`,
    /// repartitioning on hash bit `old.depth` and redirecting exactly the
    /// directory slots that referenced `old` (compared by identity).
    fn split_bucket(dir: &mut Directory<K, V>, old: &Arc<Bucket<K, V>>, bucket_size: usize) {
        let bit = 1u64 << old.depth;
        let zero = Arc::new(Bucket::new(old.depth + 1, bucket_size));
        let one = Arc::new(Bucket::new(old.depth + 1, bucket_size));

        for (k, v) in old.snapshot() {
            let target = if Self::hash_of(&k) & bit == 0 {
                &zero
            } else {
                &one
            };
            target.insert(k, v);
        }

        for i in 0..dir.buckets.len() {
            if Arc::ptr_eq(&dir.buckets[i], old) {
                dir.buckets[i] = if (i as u64) & bit == 0 {
                    Arc::clone(&zero)
                } else {
                    Arc::clone(&one)
                };
            }
        }
    }

    /// Number of low-order hash bits the directory currently distinguishes.
    pub fn global_depth(&self) -> usize {
        self.dir.lock().global_depth
    }

    /// Local depth of the bucket referenced by a directory slot; 0 when the
    /// slot index is out of range.
    pub fn local_depth(&self, directory_index: usize) -> usize {
        let dir = self.dir.lock();
        dir.buckets
            .get(directory_index)
            .map_or(0, |bucket| bucket.depth)
    }

    /// Count of distinct buckets referenced by the directory.
    pub fn num_buckets(&self) -> usize {
        let dir = self.dir.lock();
        dir.buckets
            .iter()
            .map(|b| Arc::as_ptr(b) as usize)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Total number of stored items.
    pub fn len(&self) -> usize {
        let dir = self.dir.lock();
        let mut seen = HashSet::new();
        dir.buckets
            .iter()
            .filter(|b| seen.insert(Arc::as_ptr(b) as usize))
            .map(|b| b.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table() {
        let table: ExtendibleHashTable<u32, String> = ExtendibleHashTable::new(4);
        assert_eq!(table.global_depth(), 0);
        assert_eq!(table.local_depth(0), 0);
        assert_eq!(table.num_buckets(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_and_find() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1, "a").unwrap();
        table.insert(2, "b").unwrap();
        table.insert(3, "c").unwrap();

        assert_eq!(table.find(&1), Some("a"));
        assert_eq!(table.find(&2), Some("b"));
        assert_eq!(table.find(&3), Some("c"));
        assert_eq!(table.find(&4), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_insert_overwrites_existing_key() {
        let table = ExtendibleHashTable::new(2);

        table.insert(7, "old").unwrap();
        table.insert(7, "new").unwrap();

        assert_eq!(table.find(&7), Some("new"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1, 10).unwrap();
        table.insert(2, 20).unwrap();

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
        assert_eq!(table.find(&2), Some(20));
    }

    #[test]
    fn test_split_grows_directory() {
        let table = ExtendibleHashTable::new(2);

        for i in 0..32u64 {
            table.insert(i, i * 10).unwrap();
        }

        // 32 items cannot fit in one two-slot bucket; splits must have run.
        assert!(table.num_buckets() >= 2);
        assert!(table.global_depth() >= 1);
        // Directory size bounds the bucket count.
        assert!(table.num_buckets() <= 1 << table.global_depth());

        for i in 0..32u64 {
            assert_eq!(table.find(&i), Some(i * 10), "lost key {}", i);
        }
    }

    #[test]
    fn test_local_depth_bounded_by_global() {
        let table = ExtendibleHashTable::new(1);

        for i in 0..64u64 {
            table.insert(i, ()).unwrap();
        }

        let global = table.global_depth();
        for slot in 0..(1usize << global) {
            assert!(table.local_depth(slot) <= global);
        }
        // Out-of-range slot reports depth 0.
        assert_eq!(table.local_depth(1 << (global + 1)), 0);
    }

    #[test]
    fn test_mixed_insert_remove() {
        let table = ExtendibleHashTable::new(3);

        for i in 0..100u64 {
            table.insert(i, i).unwrap();
        }
        for i in (0..100u64).step_by(2) {
            assert!(table.remove(&i));
        }
        for i in 0..100u64 {
            let expected = if i % 2 == 0 { None } else { Some(i) };
            assert_eq!(table.find(&i), expected);
        }
        assert_eq!(table.len(), 50);
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(ExtendibleHashTable::new(4));
        let mut handles = Vec::new();

        for t in 0..4u64 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..250u64 {
                    table.insert(t * 1000 + i, i).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..4u64 {
            for i in 0..250u64 {
                assert_eq!(table.find(&(t * 1000 + i)), Some(i));
            }
        }
        assert_eq!(table.len(), 1000);
    }
}
