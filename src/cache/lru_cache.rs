//! Generic capacity-bounded cache with least-recently-used eviction.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// Default number of entries kept by [`LeastRecentlyUsedCache`].
pub const DEFAULT_LRU_CAPACITY: usize = 128;

/// Key/value cache contract.
///
/// Implementations are not required to be thread-safe; callers that share a
/// cache across threads serialize access themselves.
pub trait Cache<K, V> {
    /// Insert `value` under `key`, marking it most recently used.
    ///
    /// Returns the displaced entry: the previous value under `key`, or the
    /// least-recently-used entry evicted to make room.
    fn put(&mut self, key: K, value: V) -> Option<(K, V)>;

    /// Look up `key`, marking it most recently used.
    fn get(&mut self, key: &K) -> Option<V>;

    /// Whether `key` is cached. Counts as an access.
    fn contains(&mut self, key: &K) -> bool;

    fn remove(&mut self, key: &K) -> Option<V>;

    fn clear(&mut self);

    /// Maximum number of entries.
    fn limit(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from most to least recently used.
    fn keys(&self) -> Vec<K>;

    /// Values from most to least recently used.
    fn values(&self) -> Vec<V>;
}

/// [`Cache`] that holds at most `limit` entries.
///
/// An insertion into a full cache evicts exactly one entry, the least
/// recently used, before the new entry is stored.
pub struct LeastRecentlyUsedCache<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
}

impl<K: Hash + Eq, V> LeastRecentlyUsedCache<K, V> {
    /// Create a cache holding up to `limit` entries. A limit of zero is
    /// raised to one.
    pub fn new(limit: usize) -> Self {
        let limit = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(limit),
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        let limit = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        self.entries.resize(limit);
    }
}

impl<K: Hash + Eq, V> Default for LeastRecentlyUsedCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_LRU_CAPACITY)
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Cache<K, V> for LeastRecentlyUsedCache<K, V> {
    fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        self.entries.push(key, value)
    }

    fn get(&mut self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    fn contains(&mut self, key: &K) -> bool {
        self.entries.get(key).is_some()
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn limit(&self) -> usize {
        self.entries.cap().get()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    fn values(&self) -> Vec<V> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}
