//! Coordinator projections: the per-class data view and counters

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::cache::DataClass;

/// Last value fetched for each key, grouped by data class
///
/// This is what a UI renders from. It is not cleared by invalidation: a stale
/// row stays visible until the next read replaces it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorState {
    pub data: BTreeMap<DataClass, BTreeMap<String, Value>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl CoordinatorState {
    pub fn record(&mut self, class: DataClass, key: &str, value: Value) {
        self.data.entry(class).or_default().insert(key.to_string(), value);
        self.last_updated = Some(Utc::now());
    }

    pub fn get(&self, class: DataClass, key: &str) -> Option<&Value> {
        self.data.get(&class).and_then(|entries| entries.get(key))
    }

    /// Every key recorded for one class
    pub fn class(&self, class: DataClass) -> Option<&BTreeMap<String, Value>> {
        self.data.get(&class)
    }

    pub fn is_empty(&self) -> bool {
        self.data.values().all(BTreeMap::is_empty)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub fetches_started: AtomicU64,
    pub fetches_joined: AtomicU64,
    pub fetches_failed: AtomicU64,
    pub mutations_succeeded: AtomicU64,
    pub mutations_failed: AtomicU64,
    pub events_relayed: AtomicU64,
    pub polls: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoordinatorMetrics {
        CoordinatorMetrics {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_joined: self.fetches_joined.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            mutations_succeeded: self.mutations_succeeded.load(Ordering::Relaxed),
            mutations_failed: self.mutations_failed.load(Ordering::Relaxed),
            events_relayed: self.events_relayed.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
        }
    }
}

/// Coordinator metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Fetches actually issued through the queue
    pub fetches_started: u64,
    /// Callers that attached to a fetch already in flight
    pub fetches_joined: u64,
    pub fetches_failed: u64,
    pub mutations_succeeded: u64,
    pub mutations_failed: u64,
    /// Channel events fanned out on the coordinator bus
    pub events_relayed: u64,
    /// Degraded-mode refreshes run
    pub polls: u64,
}
