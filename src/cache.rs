use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Explicit key -> (value, inserted-at) map with a fixed TTL. Population is
/// idempotent: inserting the same key again just refreshes the entry, so
/// racing writers converge on last-write-wins.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let (value, inserted) = self.entries.get(key)?;
        if inserted.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now()));
    }

    pub fn get_or_insert_with(&mut self, key: K, fill: impl FnOnce() -> V) -> V
    where
        K: Clone,
    {
        if let Some(v) = self.get(&key) {
            return v;
        }
        let v = fill();
        self.entries.insert(key, (v.clone(), Instant::now()));
        v
    }

    /// Drops expired entries. Called opportunistically, never required for
    /// correctness.
    pub fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, at)| at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl_miss_after() {
        let mut cache = TtlCache::new(Duration::from_millis(50));
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), Some(1));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"k"), None);
    }

    #[test]
    fn reinsert_refreshes() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.get(&"k"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_or_insert_fills_once() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        let mut calls = 0;
        cache.get_or_insert_with("k", || {
            calls += 1;
            7
        });
        cache.get_or_insert_with("k", || {
            calls += 1;
            8
        });
        assert_eq!(calls, 1);
        assert_eq!(cache.get(&"k"), Some(7));
    }
}
