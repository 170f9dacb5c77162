//! Expiring key/value store
//!
//! Freshness is decided at read time: `get` never returns an entry whose expiry
//! instant has passed, whether or not the sweeper has run. The sweeper only
//! reclaims memory for keys nobody reads again. Both paths remove under the same
//! lock, so an entry is evicted exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::entry::CacheEntry;
use super::pattern::KeyPattern;

/// Counters for cache observability
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Entries removed because they expired (lazy or swept)
    pub expired: u64,
    /// Entries currently stored, including expired ones not yet evicted
    pub entries: usize,
}

/// In-memory store where every entry carries its own TTL
pub struct ExpiringCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    expired: AtomicU64,
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key` for `ttl`, replacing any existing entry
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) -> V {
        let entry = CacheEntry::new(key, value, ttl);
        let value = entry.value.clone();
        debug!(key = %entry.key, ?ttl, "ExpiringCache::set");
        self.entries().insert(entry.key.clone(), entry);
        self.inserts.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Fresh value for `key`, evicting it if it has expired
    pub fn get(&self, key: &str) -> Option<V> {
        match self.lookup(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Same freshness check as `get` without cloning the value or counting a hit
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_fresh_at(now) => true,
            Some(_) => {
                entries.remove(key);
                self.expired.fetch_add(1, Ordering::Relaxed);
                false
            }
            None => false,
        }
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_fresh_at(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                self.expired.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "ExpiringCache::get: evicted expired entry");
                None
            }
            None => None,
        }
    }

    /// Remaining lifetime of a fresh entry
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|entry| entry.is_fresh_at(now))
            .map(|entry| entry.expires_at.saturating_duration_since(now))
    }

    /// Remove one key; false if it was absent
    pub fn delete(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    /// Remove everything; returns how many entries were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Remove every key matched by any pattern
    pub fn invalidate(&self, patterns: &[KeyPattern]) -> usize {
        if patterns.iter().any(|p| matches!(p, KeyPattern::All)) {
            return self.clear();
        }
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|key, _| !patterns.iter().any(|p| p.matches(key)));
        let removed = before - entries.len();
        debug!(?patterns, removed, "ExpiringCache::invalidate");
        removed
    }

    /// Evict every expired entry; returns how many were evicted
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh_at(now));
        let purged = before - entries.len();
        self.expired.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    /// Keys whose entries are still fresh
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries()
            .values()
            .filter(|entry| entry.is_fresh_at(now))
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl<V: Clone> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the eager sweeper
///
/// Holds only a weak reference, so it also stops once the cache is dropped.
pub fn spawn_sweeper<V>(cache: &Arc<ExpiringCache<V>>, every: Duration, token: CancellationToken) -> JoinHandle<()>
where
    V: Clone + Send + 'static,
{
    let weak = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let Some(cache) = weak.upgrade() else {
                break;
            };
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(purged, "Cache sweep evicted expired entries");
            }
        }
        debug!("Cache sweeper stopped");
    })
}
