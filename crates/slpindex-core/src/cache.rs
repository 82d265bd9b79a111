//! Fixed-capacity caches with insertion-order eviction, over `lru::LruCache`.
//!
//! Only writes touch recency: reads use `peek`/`contains`, so the eviction
//! order is the order of the latest insert of each key.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// Map that evicts its oldest entry once `capacity` is exceeded.
///
/// Re-inserting an existing key replaces its value and makes it the newest
/// entry.
pub struct BoundedCache<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    /// Insert or replace `key`, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.put(key, value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.inner.iter().rev()
    }
}

/// Set counterpart of [`BoundedCache`].
pub struct BoundedSet<K: Hash + Eq> {
    inner: BoundedCache<K, ()>,
}

impl<K: Hash + Eq> BoundedSet<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedCache::new(capacity),
        }
    }

    /// Add `key`; returns `true` if it was not already present.
    pub fn insert(&mut self, key: K) -> bool {
        self.inner.insert(key, ()).is_none()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        self.inner.iter().map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut cache = BoundedCache::new(3);
        for i in 0..5 {
            cache.insert(i, i * 10);
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains_key(&0));
        assert!(!cache.contains_key(&1));
        assert_eq!(cache.get(&4), Some(&40));
        let keys: Vec<_> = cache.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![2, 3, 4]);
    }

    #[test]
    fn reinsert_refreshes_position() {
        let mut cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.insert("a", 3), Some(1));
        cache.insert("c", 4);
        // "b" is now the oldest entry
        assert!(!cache.contains_key(&"b"));
        assert_eq!(cache.get(&"a"), Some(&3));
        assert_eq!(cache.get(&"c"), Some(&4));
    }

    #[test]
    fn reads_do_not_refresh_position() {
        let mut cache = BoundedCache::new(2);
        cache.insert(1, ());
        cache.insert(2, ());
        assert!(cache.get(&1).is_some());
        assert!(cache.contains_key(&1));
        cache.insert(3, ());
        assert!(!cache.contains_key(&1));
        assert!(cache.contains_key(&2));
    }

    #[test]
    fn removed_key_comes_back_as_newest() {
        let mut cache = BoundedCache::new(2);
        cache.insert(1, ());
        cache.remove(&1);
        cache.insert(2, ());
        cache.insert(1, ());
        cache.insert(3, ());
        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
        assert!(cache.contains_key(&3));
    }

    #[test]
    fn zero_capacity_holds_one_entry() {
        let mut cache = BoundedCache::new(0);
        cache.insert(1u32, ());
        cache.insert(2u32, ());
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&2));
    }

    #[test]
    fn bounded_set_push_and_delete() {
        let mut set = BoundedSet::new(2);
        assert!(set.insert("x"));
        assert!(!set.insert("x"));
        set.insert("y");
        set.insert("z");
        assert!(!set.contains(&"x"));
        assert!(set.remove(&"y"));
        assert!(!set.contains(&"y"));
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec!["z"]);
    }
}
