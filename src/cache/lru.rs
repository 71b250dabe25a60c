//! Bounded in-memory LRU tier
//!
//! Generic over the stored value so the byte cache and the query cache
//! share one implementation.

use crate::error::{Error, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Thread-safe bounded LRU map keyed by string
///
/// The lock is held only for the map operation itself, never across await
/// points, so this is safe to call from sync and async contexts alike.
pub struct LruTier<V> {
    entries: Mutex<LruCache<String, V>>,
}

impl<V: Clone> LruTier<V> {
    /// Create a tier holding at most `capacity` entries
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| Error::Config {
            message: "memory tier capacity must be at least 1".into(),
            key: Some("max_memory_items".into()),
        })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Get a value, promoting it to most recently used
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        entries.get(key).cloned()
    }

    /// Insert or replace a value, evicting the least recently used entry if full
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.lock().put(key.into(), value);
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().pop(key)
    }

    /// True if the key is present; does not affect recency
    pub fn contains(&self, key: &str) -> bool {
        self.lock().peek(key).is_some()
    }

    /// Update a value in place if present, without changing recency
    pub fn update<F: FnOnce(&mut V)>(&self, key: &str, f: F) -> bool {
        let mut entries = self.lock();
        match entries.peek_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when the tier holds no entries
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Change the capacity, evicting oldest entries if shrinking
    ///
    /// A capacity of 0 is ignored; the tier keeps its current bound.
    pub fn resize(&self, capacity: usize) {
        if let Some(capacity) = NonZeroUsize::new(capacity) {
            self.lock().resize(capacity);
        } else {
            tracing::warn!("ignoring memory tier resize to 0");
        }
    }

    /// Remove entries failing the predicate, returning how many were dropped
    pub fn retain<F: Fn(&str, &V) -> bool>(&self, keep: F) -> usize {
        let mut entries = self.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, V>> {
        // A poisoned lock means a panic while holding it; the map itself is
        // still structurally sound, so recover the guard.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<V> std::fmt::Debug for LruTier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        f.debug_struct("LruTier").field("len", &len).finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_put_get_remove() {
        let tier: LruTier<String> = LruTier::new(10).unwrap();

        tier.put("a", "alpha".to_string());
        assert_eq!(tier.get("a"), Some("alpha".to_string()));
        assert_eq!(tier.get("b"), None);
        assert_eq!(tier.len(), 1);

        assert_eq!(tier.remove("a"), Some("alpha".to_string()));
        assert!(tier.is_empty());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result: Result<LruTier<u32>> = LruTier::new(0);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn least_recently_used_entry_is_evicted_first() {
        let tier: LruTier<u32> = LruTier::new(2).unwrap();

        tier.put("a", 1);
        tier.put("b", 2);
        // Touch "a" so "b" becomes the eviction candidate
        assert_eq!(tier.get("a"), Some(1));
        tier.put("c", 3);

        assert_eq!(tier.get("a"), Some(1));
        assert_eq!(tier.get("b"), None, "b was least recently used");
        assert_eq!(tier.get("c"), Some(3));
    }

    #[test]
    fn contains_does_not_promote() {
        let tier: LruTier<u32> = LruTier::new(2).unwrap();

        tier.put("a", 1);
        tier.put("b", 2);
        // Peek at "a" without promoting; it should still evict first
        assert!(tier.contains("a"));
        tier.put("c", 3);

        assert_eq!(tier.get("a"), None, "peek must not refresh recency");
        assert_eq!(tier.get("b"), Some(2));
    }

    #[test]
    fn update_mutates_in_place() {
        let tier: LruTier<u32> = LruTier::new(4).unwrap();
        tier.put("counter", 1);

        assert!(tier.update("counter", |v| *v += 10));
        assert_eq!(tier.get("counter"), Some(11));
        assert!(!tier.update("missing", |v| *v += 1));
    }

    #[test]
    fn resize_shrinks_and_evicts() {
        let tier: LruTier<u32> = LruTier::new(4).unwrap();
        for i in 0..4 {
            tier.put(format!("k{i}"), i);
        }
        tier.resize(2);
        assert_eq!(tier.len(), 2);
        // The two most recent survive
        assert_eq!(tier.get("k3"), Some(3));
        assert_eq!(tier.get("k2"), Some(2));
    }

    #[test]
    fn retain_drops_failing_entries() {
        let tier: LruTier<u32> = LruTier::new(8).unwrap();
        for i in 0..6 {
            tier.put(format!("k{i}"), i);
        }
        let dropped = tier.retain(|_, v| v % 2 == 0);
        assert_eq!(dropped, 3);
        assert_eq!(tier.len(), 3);
        assert_eq!(tier.get("k1"), None);
        assert_eq!(tier.get("k2"), Some(2));
    }

    #[test]
    fn clear_empties_the_tier() {
        let tier: LruTier<u32> = LruTier::new(4).unwrap();
        tier.put("a", 1);
        tier.put("b", 2);
        tier.clear();
        assert!(tier.is_empty());
    }
}
