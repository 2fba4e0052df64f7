//! Process-wide TTL cache for progress aggregates.
//!
//! Entries are keyed by the cached function's name plus a serialisation of
//! its arguments, so every call made through one function shares the
//! `"{function}:"` prefix and can be evicted in bulk.
//!
//! Expiry is checked on read. When full, the single oldest entry (by store
//! time, not by access) is evicted before inserting.

use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Time source for expiry checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for expiry tests
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|p| p.into_inner());
        self.origin + offset
    }
}

/// Key of a memoised call: function identity plus serialised arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from a function name and its arguments.
    ///
    /// Keyword-style arguments are expected to be folded into `args`
    /// (a tuple or a struct), which is serialised as JSON.
    pub fn new<A: Serialize + ?Sized>(function: &str, args: &A) -> Self {
        let args = serde_json::to_string(args).unwrap_or_default();
        CacheKey(format!("{}:{}", function, args))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn belongs_to(&self, function: &str) -> bool {
        self.0
            .strip_prefix(function)
            .map(|rest| rest.starts_with(':'))
            .unwrap_or(false)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    stored_at: Instant,
}

/// TTL cache with age-based eviction
pub struct TtlCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    /// Create a cache using the system clock
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self::with_clock(ttl, max_size, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_size,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fetch a live entry. Stale entries are removed and reported as a miss.
    pub fn get<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = self.clock.now();
        let mut entries = self.lock();

        let stale = match entries.get(key) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.stored_at) > self.ttl,
        };
        if stale {
            entries.remove(key);
            return None;
        }

        entries
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<T>())
            .cloned()
    }

    /// Store a value stamped with the current time
    pub fn set<T>(&self, key: CacheKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        let now = self.clock.now();
        let mut entries = self.lock();

        if entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                stored_at: now,
            },
        );
    }

    pub fn delete(&self, key: &CacheKey) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Evict every entry recorded for `function`, whatever its arguments.
    /// Returns the number of evicted entries.
    pub fn invalidate_function(&self, function: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.belongs_to(function));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_cache(ttl_secs: u64, max_size: usize) -> (TtlCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::with_clock(Duration::from_secs(ttl_secs), max_size, clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_key_format() {
        let key = CacheKey::new("module_progress", &(3, 9));
        assert_eq!(key.as_str(), "module_progress:[3,9]");
    }

    #[test]
    fn test_hit_within_ttl() {
        let (cache, clock) = manual_cache(60, 10);
        let key = CacheKey::new("lesson_completed", &(1, 2));
        cache.set(key.clone(), true);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get::<bool>(&key), Some(true));
    }

    #[test]
    fn test_expired_entry_is_evicted_on_read() {
        let (cache, clock) = manual_cache(60, 10);
        let key = CacheKey::new("lesson_completed", &(1, 2));
        cache.set(key.clone(), false);

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get::<bool>(&key), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_wrong_type_is_a_miss() {
        let (cache, _) = manual_cache(60, 10);
        let key = CacheKey::new("f", &1);
        cache.set(key.clone(), 5u32);
        assert_eq!(cache.get::<String>(&key), None);
        assert_eq!(cache.get::<u32>(&key), Some(5));
    }

    #[test]
    fn test_full_cache_evicts_oldest_stored() {
        let (cache, clock) = manual_cache(600, 2);
        let first = CacheKey::new("f", &1);
        let second = CacheKey::new("f", &2);
        let third = CacheKey::new("f", &3);

        cache.set(first.clone(), 1);
        clock.advance(Duration::from_secs(1));
        cache.set(second.clone(), 2);
        clock.advance(Duration::from_secs(1));

        // Reading does not refresh age: this is not LRU
        assert_eq!(cache.get::<i32>(&first), Some(1));
        cache.set(third.clone(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<i32>(&first), None);
        assert_eq!(cache.get::<i32>(&second), Some(2));
        assert_eq!(cache.get::<i32>(&third), Some(3));
    }

    #[test]
    fn test_invalidate_function_matches_prefix_only() {
        let (cache, _) = manual_cache(600, 100);
        cache.set(CacheKey::new("module_progress", &(1, 1)), 1);
        cache.set(CacheKey::new("module_progress", &(2, 7)), 2);
        cache.set(CacheKey::new("module_progress_v2", &(1, 1)), 3);
        cache.set(CacheKey::new("discipline_progress", &(1, 1)), 4);

        assert_eq!(cache.invalidate_function("module_progress"), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get::<i32>(&CacheKey::new("module_progress_v2", &(1, 1))),
            Some(3)
        );
    }

    #[test]
    fn test_delete_and_clear() {
        let (cache, _) = manual_cache(600, 100);
        let a = CacheKey::new("f", &"a");
        let b = CacheKey::new("f", &"b");
        cache.set(a.clone(), 1);
        cache.set(b.clone(), 2);

        cache.delete(&a);
        assert_eq!(cache.get::<i32>(&a), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
