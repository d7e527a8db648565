//! Bounded in-memory TTL cache for read-mostly aggregate queries
//!
//! Entries expire once `now - stored_at > ttl`; expired entries are dropped
//! lazily on `get`. When a new key arrives at capacity, the single entry with
//! the oldest `stored_at` is evicted first. The cache is advisory: a miss only
//! costs an extra remote round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Default number of entries kept
pub const DEFAULT_CAPACITY: usize = 20;

/// Default time-to-live
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
}

/// Key-value cache with per-entry TTL and oldest-entry eviction
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    capacity: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a live entry. Expired entries count as misses and are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => {
                entries.remove(key);
            }
            None => {}
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value under the default TTL
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value with an explicit TTL
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                tracing::debug!(key = %oldest, "Evicted oldest cache entry");
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop one entry
    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including ones not yet lazily expired
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // A panic mid-update leaves at worst a stale entry; the cache is advisory
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
