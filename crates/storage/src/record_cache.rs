//! Bounded LRU caches
//!
//! [`LruMap`] is an arena of entries threaded on an intrusive doubly linked
//! recency list, indexed by an `FxHashMap`. [`RecordCache`] wraps it behind a
//! mutex and maps content keys to the [`RecordId`] they were written under,
//! so writers can skip re-serializing content they already stored.
//!
//! A cache created with a size of zero or less is a no-op: `put` discards,
//! `get` always misses.

use arbor_core::RecordId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const NIL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Fixed-capacity map evicting the least recently accessed entry
///
/// Both `get` hits and `put` count as an access.
pub struct LruMap<K, V> {
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    index: FxHashMap<K, usize>,
    /// Most recently used
    head: usize,
    /// Least recently used
    tail: usize,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruMap<K, V> {
    /// Create a map holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity.min(4096)),
            free: Vec::new(),
            index: FxHashMap::default(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn entry(&self, slot: usize) -> &Entry<K, V> {
        self.slots[slot].as_ref().expect("linked slot is occupied")
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry<K, V> {
        self.slots[slot].as_mut().expect("linked slot is occupied")
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let e = self.entry(slot);
            (e.prev, e.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.entry_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.entry_mut(next).prev = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let e = self.entry_mut(slot);
            e.prev = NIL;
            e.next = old_head;
        }
        if old_head != NIL {
            self.entry_mut(old_head).prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.head != slot {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    /// Look up a key, marking it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.touch(slot);
        Some(&self.entry(slot).value)
    }

    /// Look up a key without changing recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        Some(&self.entry(slot).value)
    }

    /// Insert or replace; returns the evicted entry, if any
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            self.entry_mut(slot).value = value;
            self.touch(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let entry = Entry {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
        evicted
    }

    /// Remove a key
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        self.free.push(slot);
        self.slots[slot].take().map(|e| e.value)
    }

    /// Remove and return the least recently used entry
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let slot = self.tail;
        self.unlink(slot);
        self.free.push(slot);
        let entry = self.slots[slot].take()?;
        self.index.remove(&entry.key);
        Some((entry.key, entry.value))
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut slot = self.head;
        while slot != NIL {
            let e = self.entry(slot);
            keys.push(e.key.clone());
            slot = e.next;
        }
        keys
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful lookups
    pub hits: u64,
    /// Failed lookups
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Deduplication cache from content keys to record ids
pub struct RecordCache<K> {
    map: Option<Mutex<LruMap<K, RecordId>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Produces fresh caches of one configured size
pub type RecordCacheFactory<K> = Arc<dyn Fn() -> RecordCache<K> + Send + Sync>;

impl<K: Hash + Eq + Clone> RecordCache<K> {
    /// Create a cache of `size` entries; `size <= 0` gives a no-op cache
    pub fn new(size: i64) -> Self {
        let map = if size > 0 {
            Some(Mutex::new(LruMap::new(size as usize)))
        } else {
            None
        };
        Self {
            map,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Factory producing caches of `size` entries
    pub fn factory(size: i64) -> RecordCacheFactory<K>
    where
        K: Send + 'static,
    {
        Arc::new(move || RecordCache::new(size))
    }

    /// True if this cache never stores anything
    pub fn is_noop(&self) -> bool {
        self.map.is_none()
    }

    /// Remember that `key` was written as `id`
    pub fn put(&self, key: K, id: RecordId) {
        if let Some(map) = &self.map {
            if map.lock().put(key, id).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record id previously stored for `key`
    pub fn get(&self, key: &K) -> Option<RecordId> {
        let found = self.map.as_ref().and_then(|map| map.lock().get(key).copied());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Number of cached entries
    pub fn size(&self) -> usize {
        self.map.as_ref().map(|m| m.lock().len()).unwrap_or(0)
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::SegmentId;
    use proptest::prelude::*;

    fn rid(n: u32) -> RecordId {
        RecordId::new(SegmentId::new(7, 7), n)
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let cache = RecordCache::new(2);
        cache.put("k1", rid(1));
        cache.put("k2", rid(2));
        cache.put("k3", rid(3));
        assert_eq!(cache.get(&"k1"), None);
        assert_eq!(cache.get(&"k2"), Some(rid(2)));
        assert_eq!(cache.get(&"k3"), Some(rid(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = RecordCache::new(2);
        cache.put("k1", rid(1));
        cache.put("k2", rid(2));
        assert_eq!(cache.get(&"k1"), Some(rid(1)));
        cache.put("k3", rid(3));
        assert_eq!(cache.get(&"k1"), Some(rid(1)));
        assert_eq!(cache.get(&"k2"), None);
    }

    #[test]
    fn test_put_replaces_and_refreshes() {
        let cache = RecordCache::new(2);
        cache.put("k1", rid(1));
        cache.put("k2", rid(2));
        cache.put("k1", rid(10));
        cache.put("k3", rid(3));
        assert_eq!(cache.get(&"k1"), Some(rid(10)));
        assert_eq!(cache.get(&"k2"), None);
    }

    #[test]
    fn test_non_positive_size_is_noop() {
        for size in [0, -1] {
            let cache = RecordCache::new(size);
            assert!(cache.is_noop());
            cache.put("k", rid(1));
            assert_eq!(cache.get(&"k"), None);
            assert_eq!(cache.size(), 0);
        }
    }

    #[test]
    fn test_factory_produces_independent_caches() {
        let factory = RecordCache::<u128>::factory(8);
        let a = factory();
        let b = factory();
        a.put(1, rid(1));
        assert_eq!(a.get(&1), Some(rid(1)));
        assert_eq!(b.get(&1), None);
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache = RecordCache::new(4);
        cache.put(1u128, rid(1));
        cache.get(&1);
        cache.get(&2);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_map_remove_and_reuse_slots() {
        let mut map = LruMap::new(3);
        map.put(1, "a");
        map.put(2, "b");
        map.put(3, "c");
        assert_eq!(map.remove(&2), Some("b"));
        map.put(4, "d");
        assert_eq!(map.len(), 3);
        assert_eq!(map.keys(), vec![4, 3, 1]);
        assert_eq!(map.pop_lru(), Some((1, "a")));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(RecordCache::new(64));
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..1000u32 {
                        let key = (t * 1000 + i) as u128;
                        cache.put(key, rid(i));
                        cache.get(&key);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.size(), 64);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(capacity in 1usize..16, keys in proptest::collection::vec(0u32..64, 0..200)) {
            let mut map = LruMap::new(capacity);
            for k in keys {
                map.put(k, k);
                prop_assert!(map.len() <= capacity);
                prop_assert_eq!(map.keys().len(), map.len());
            }
        }

        #[test]
        fn prop_most_recent_put_survives(keys in proptest::collection::vec(0u32..32, 1..100)) {
            let mut map = LruMap::new(4);
            for k in &keys {
                map.put(*k, ());
            }
            let last = *keys.last().unwrap();
            prop_assert!(map.peek(&last).is_some());
        }
    }
}
