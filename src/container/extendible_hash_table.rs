use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use parking_lot::Mutex;

/// A bucket holds up to `capacity` key/value entries. Buckets live in a
/// slab; directory slots refer to them by slab index so that several
/// slots can share one bucket.
#[derive(Debug)]
struct Bucket<K, V> {
    items: Vec<(K, V)>,
    capacity: usize,
    local_depth: usize,
}

impl<K: PartialEq, V> Bucket<K, V> {
    fn new(capacity: usize, local_depth: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            local_depth,
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn insert(&mut self, key: K, value: V) -> bool {
        if let Some(slot) = self.items.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.items.push((key, value));
        true
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            return true;
        }
        false
    }
}

struct Inner<K, V> {
    /// Directory of length 2^global_depth; entries index into `buckets`.
    dir: Vec<usize>,
    /// Bucket slab. Split buckets leave dead entries behind; `num_buckets`
    /// tracks the live count.
    buckets: Vec<Bucket<K, V>>,
    global_depth: usize,
    num_buckets: usize,
}

/// Extendible hash table: a {K -> V} map that grows by doubling its
/// directory and splitting overflowing buckets.
///
/// Each bucket carries a local depth d <= global depth and is shared by
/// the 2^(global_depth - d) directory slots whose low d hash bits agree.
/// All operations serialize on a single mutex; the buffer pool uses this
/// table as its page-id -> frame directory.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    inner: Mutex<Inner<K, V>>,
    bucket_size: usize,
    hash_builder: S,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a table whose buckets hold up to `bucket_size` entries.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Creates a table with an explicit hasher. Tests use this to pin
    /// hash values and drive specific split sequences.
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                dir: vec![0],
                buckets: vec![Bucket::new(bucket_size, 0)],
                global_depth: 0,
                num_buckets: 1,
            }),
            bucket_size,
            hash_builder,
        }
    }

    fn hash(&self, key: &K) -> usize {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    fn index_of(&self, key: &K, global_depth: usize) -> usize {
        self.hash(key) & ((1 << global_depth) - 1)
    }

    /// Looks up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let idx = self.index_of(key, inner.global_depth);
        inner.buckets[inner.dir[idx]].find(key).cloned()
    }

    /// Inserts `key -> value`, overwriting any existing entry. Splits the
    /// target bucket (doubling the directory when its local depth has
    /// caught up with the global depth) until the entry fits.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        let mut idx = self.index_of(&key, inner.global_depth);
        if inner.buckets[inner.dir[idx]].find(&key).is_some() {
            let slot = inner.dir[idx];
            inner.buckets[slot].insert(key, value);
            return;
        }

        while inner.buckets[inner.dir[idx]].is_full() {
            if inner.buckets[inner.dir[idx]].local_depth == inner.global_depth {
                // Double the directory by appending a copy of itself.
                let copy = inner.dir.clone();
                inner.dir.extend(copy);
                inner.global_depth += 1;
            }
            self.split_bucket(&mut inner, &key);
            idx = self.index_of(&key, inner.global_depth);
        }

        let slot = inner.dir[idx];
        inner.buckets[slot].insert(key, value);
    }

    /// Removes the entry stored under `key`. Buckets never merge.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let idx = self.index_of(key, inner.global_depth);
        let slot = inner.dir[idx];
        inner.buckets[slot].remove(key)
    }

    /// Splits the bucket `key` maps to into two buckets of local depth
    /// old+1, redistributing entries by the `1 << old_depth` hash bit and
    /// reassigning every directory slot that pointed at the old bucket.
    fn split_bucket(&self, inner: &mut Inner<K, V>, key: &K) {
        let idx = self.index_of(key, inner.global_depth);
        let old_slot = inner.dir[idx];
        let old_depth = inner.buckets[old_slot].local_depth;
        let bit = 1usize << old_depth;

        let mut b0 = Bucket::new(self.bucket_size, old_depth + 1);
        let mut b1 = Bucket::new(self.bucket_size, old_depth + 1);
        for (k, v) in inner.buckets[old_slot].items.drain(..) {
            if self.hash(&k) & bit != 0 {
                b1.items.push((k, v));
            } else {
                b0.items.push((k, v));
            }
        }
        inner.buckets[old_slot] = b0;
        let b1_slot = inner.buckets.len();
        inner.buckets.push(b1);
        inner.num_buckets += 1;

        // Every slot that referred to the old bucket shares its low
        // old_depth bits with the key's hash.
        let low = self.hash(key) & (bit - 1);
        let dir_len = inner.dir.len();
        let mut i = low;
        while i < dir_len {
            inner.dir[i] = if i & bit != 0 { b1_slot } else { old_slot };
            i += bit;
        }
    }

    /// Number of hash bits the directory uses.
    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Number of hash bits the bucket at directory index `dir_index` uses.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].local_depth
    }

    /// Number of live buckets.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }

    /// Directory length (2^global_depth).
    pub fn dir_size(&self) -> usize {
        self.inner.lock().dir.len()
    }
}
