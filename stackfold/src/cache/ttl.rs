//! Capacity- and time-bounded LRU cache
//!
//! Eviction happens in two independent ways:
//! - **Capacity**: once full, inserting a new key evicts the least recently
//!   used entry.
//! - **Lifetime**: entries carry an expiry instant. Expired entries are never
//!   returned, but they only release memory when [`TtlCache::purge_expired`]
//!   runs (once per reporting interval) or when they are looked up.
//!
//! All operations take one internal mutex, so the cache can be shared freely
//! between ingestion paths and the periodic purger.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::domain::CacheError;

struct Entry<V> {
    value: V,
    /// Recency stamp, key into `Inner::recency`
    stamp: u64,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Recency order: lowest stamp is the least recently used key
    recency: BTreeMap<u64, K>,
    next_stamp: u64,
    lifetime: Option<Duration>,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    fn touch(&mut self, key: &K) {
        let stamp = self.stamp();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.stamp);
            entry.stamp = stamp;
            self.recency.insert(stamp, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.stamp);
        Some(entry.value)
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
        }
    }

    fn expiry(&self, now: Instant) -> Option<Instant> {
        self.lifetime.and_then(|lifetime| now.checked_add(lifetime))
    }
}

/// Thread-safe LRU cache with optional per-entry lifetime
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache holding at most `capacity` entries
    ///
    /// The capacity is rounded up to the next power of two.
    ///
    /// # Errors
    /// Returns an error if `capacity` is zero or cannot be rounded up
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        let capacity =
            capacity.checked_next_power_of_two().ok_or(CacheError::CapacityTooLarge(capacity))?;

        Ok(Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_stamp: 0,
                lifetime: None,
            }),
            capacity,
        })
    }

    /// Create a cache and set its entry lifetime in one step
    ///
    /// # Errors
    /// Same as [`TtlCache::new`]
    pub fn with_lifetime(capacity: usize, lifetime: Duration) -> Result<Self, CacheError> {
        let cache = Self::new(capacity)?;
        cache.set_lifetime(lifetime);
        Ok(cache)
    }

    /// Maximum number of entries (always a power of two)
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lifetime applied to entries inserted or refreshed from now on
    pub fn set_lifetime(&self, lifetime: Duration) {
        self.inner.lock().lifetime = Some(lifetime);
    }

    /// Look up a live entry and mark it as recently used
    ///
    /// Does not extend the entry's expiry; see [`TtlCache::get_and_refresh`].
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = inner.entries.get(key)?.is_expired(Instant::now());
        if expired {
            inner.remove(key);
            return None;
        }
        inner.touch(key);
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Look up a live entry, mark it as recently used and restart its lifetime
    pub fn get_and_refresh(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expired = inner.entries.get(key)?.is_expired(now);
        if expired {
            inner.remove(key);
            return None;
        }
        let expires_at = inner.expiry(now);
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.expires_at = expires_at;
        }
        inner.touch(key);
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists, without touching recency
    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        inner.entries.get(key).is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Insert or replace an entry
    ///
    /// Returns `true` if inserting evicted the least recently used entry.
    pub fn put(&self, key: K, value: V) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expires_at = inner.expiry(now);
        let stamp = inner.stamp();

        if let Some(old) = inner.entries.insert(key.clone(), Entry { value, stamp, expires_at }) {
            inner.recency.remove(&old.stamp);
            inner.recency.insert(stamp, key);
            return false;
        }
        inner.recency.insert(stamp, key);

        if inner.entries.len() > self.capacity {
            inner.evict_oldest();
            return true;
        }
        false
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    /// Drop every entry whose lifetime has elapsed
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Copy of every live entry, least recently used first
    ///
    /// Does not touch recency.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner
            .recency
            .values()
            .filter_map(|key| {
                let entry = inner.entries.get(key)?;
                (!entry.is_expired(now)).then(|| (key.clone(), entry.value.clone()))
            })
            .collect()
    }

    /// Drop every entry
    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Number of stored entries, including expired ones not yet purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_capacity_rounds_up_to_power_of_two() {
        assert_eq!(TtlCache::<u32, u32>::new(1).unwrap().capacity(), 1);
        assert_eq!(TtlCache::<u32, u32>::new(3).unwrap().capacity(), 4);
        assert_eq!(TtlCache::<u32, u32>::new(115).unwrap().capacity(), 128);
        assert_eq!(TtlCache::<u32, u32>::new(65536).unwrap().capacity(), 65536);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert_eq!(TtlCache::<u32, u32>::new(0).err(), Some(CacheError::ZeroCapacity));
        assert!(matches!(
            TtlCache::<u32, u32>::new(usize::MAX).err(),
            Some(CacheError::CapacityTooLarge(_))
        ));
    }

    #[test]
    fn test_get_put_replace() {
        let cache = TtlCache::new(4).unwrap();
        assert_eq!(cache.get(&1), None);
        assert!(!cache.put(1, "one"));
        assert_eq!(cache.get(&1), Some("one"));
        assert!(!cache.put(1, "uno"));
        assert_eq!(cache.get(&1), Some("uno"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = TtlCache::new(2).unwrap();
        cache.put("a", 1);
        cache.put("b", 2);
        // Touch "a" so "b" becomes the oldest
        assert_eq!(cache.get(&"a"), Some(1));
        assert!(cache.put("c", 3));

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entries_are_hidden_and_purged() {
        let cache = TtlCache::with_lifetime(8, Duration::from_millis(20)).unwrap();
        cache.put(1, 10);
        cache.put(2, 20);
        std::thread::sleep(Duration::from_millis(40));

        assert!(!cache.contains(&1));
        // Still stored until purged or looked up
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lookup_of_expired_entry_removes_it() {
        let cache = TtlCache::with_lifetime(8, Duration::from_millis(20)).unwrap();
        cache.put(1, 10);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_refresh_extends_lifetime() {
        let cache = TtlCache::with_lifetime(8, Duration::from_millis(200)).unwrap();
        cache.put(1, 10);
        cache.put(2, 20);
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get_and_refresh(&1), Some(10));
        std::thread::sleep(Duration::from_millis(120));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn test_snapshot_in_recency_order() {
        let cache = TtlCache::new(8).unwrap();
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        cache.get(&"a");
        assert_eq!(cache.snapshot(), vec![("b", 2), ("c", 3), ("a", 1)]);
    }

    #[test]
    fn test_no_lifetime_never_expires() {
        let cache = TtlCache::new(8).unwrap();
        cache.put(1, 10);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.get(&1), Some(10));
    }

    #[test]
    fn test_purge_drops_everything() {
        let cache = TtlCache::new(8).unwrap();
        cache.put(1, 10);
        cache.put(2, 20);
        cache.purge();
        assert!(cache.is_empty());
        // Still usable afterwards
        cache.put(3, 30);
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let cache = Arc::new(TtlCache::new(64).unwrap());
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        cache.put(t * 1000 + i, i);
                        let _ = cache.get(&(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }
}
