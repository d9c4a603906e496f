//! In-process cache with per-entry TTL.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Key-value cache with per-entry time-to-live and lazy eviction.
///
/// Shared process-wide behind an `Arc`; every read-check-then-write sequence
/// happens under a single lock acquisition, so concurrent requests cannot
/// lose updates to each other.
///
/// The cache is *not* shared across processes. A deployment running multiple
/// worker processes needs an external store for summaries and dismissal
/// markers; that is a deployment constraint, not solved here.
pub struct ShortTermCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for ShortTermCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ShortTermCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key` for `ttl`. Replaces any existing entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let expires_at = Instant::now() + ttl;
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
        self.lock().insert(key, CacheEntry { value, expires_at });
    }

    /// Delete `key` immediately.
    pub fn delete(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            tracing::debug!(key, "cache delete");
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
        tracing::debug!("cache cleared");
    }
}

impl<V: Clone> ShortTermCache<V> {
    /// Fetch `key` if present and unexpired. Expired entries are evicted on
    /// the way out.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                tracing::debug!(key, "cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ShortTermCache;
    use std::time::Duration;

    #[test]
    fn set_then_get_round_trips() {
        let cache = ShortTermCache::new();
        cache.set("summary:ctx-1", "3 open flows".to_string(), Duration::from_secs(300));
        assert_eq!(cache.get("summary:ctx-1").as_deref(), Some("3 open flows"));
        assert_eq!(cache.get("summary:ctx-2"), None);
    }

    #[test]
    fn expired_entries_are_unreadable_and_evicted() {
        let cache = ShortTermCache::new();
        cache.set("k", true, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get("k"), None);
        // A second read sees the already-evicted slot
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn delete_makes_key_immediately_unreadable() {
        let cache = ShortTermCache::new();
        cache.set("k", 1u32, Duration::from_secs(60));
        cache.delete("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn clear_drops_everything() {
        let cache = ShortTermCache::new();
        cache.set("a", 1u32, Duration::from_secs(60));
        cache.set("b", 2u32, Duration::from_secs(60));
        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn set_replaces_existing_entry() {
        let cache = ShortTermCache::new();
        cache.set("k", "old".to_string(), Duration::from_secs(60));
        cache.set("k", "new".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("k").as_deref(), Some("new"));
    }
}
