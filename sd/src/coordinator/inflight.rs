//! In-flight fetch de-duplication
//!
//! ```text
//! readThrough("quote-Q1") A ─┐
//!                            ├──► InFlightMap ──► one queued fetch
//! readThrough("quote-Q1") B ─┘         │                 │
//!                                      ▼                 ▼
//!                              [A and B receive the same outcome]
//! ```
//!
//! The first caller for a key becomes the leader and starts the fetch; later
//! callers subscribe to the leader's broadcast. An entry leaves the map when
//! its outcome is published or when an invalidation hits its key, so a caller
//! arriving after either starts a fresh fetch. Waiters that joined before an
//! invalidation still receive the detached fetch's outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::cache::KeyPattern;
use crate::error::CoordError;

/// What every caller of one fetch receives
pub(crate) type FetchOutcome = Result<Value, CoordError>;

struct InFlight {
    id: u64,
    tx: broadcast::Sender<FetchOutcome>,
    /// Set when an invalidation hits this key mid-fetch
    stale: Arc<AtomicBool>,
}

/// Result of registering interest in a key
pub(crate) enum Registration {
    /// First caller: must start the fetch and finish the ticket
    Leader(Ticket),
    /// A fetch is already running: wait for its outcome
    Follower(broadcast::Receiver<FetchOutcome>),
}

pub(crate) struct Ticket {
    pub id: u64,
    pub tx: broadcast::Sender<FetchOutcome>,
    pub rx: broadcast::Receiver<FetchOutcome>,
    pub stale: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct InFlightMap {
    entries: DashMap<String, InFlight>,
    next_id: AtomicU64,
}

impl InFlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &str) -> Registration {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!(%key, "Joining in-flight fetch");
                Registration::Follower(entry.get().tx.subscribe())
            }
            Entry::Vacant(entry) => {
                // One outcome per fetch, so one slot is enough
                let (tx, rx) = broadcast::channel(1);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let stale = Arc::new(AtomicBool::new(false));
                entry.insert(InFlight {
                    id,
                    tx: tx.clone(),
                    stale: Arc::clone(&stale),
                });
                debug!(%key, id, "Starting new fetch");
                Registration::Leader(Ticket { id, tx, rx, stale })
            }
        }
    }

    /// Remove the entry for `key` if it still belongs to fetch `id`
    pub fn release(&self, key: &str, id: u64) -> bool {
        self.entries.remove_if(key, |_, entry| entry.id == id).is_some()
    }

    /// Flag matching fetches so their results are not cached, and detach them
    /// so later callers start a fresh fetch
    pub fn mark_stale(&self, patterns: &[KeyPattern]) -> usize {
        let mut detached = 0;
        self.entries.retain(|key, entry| {
            if patterns.iter().any(|p| p.matches(key)) {
                entry.stale.store(true, Ordering::SeqCst);
                detached += 1;
                false
            } else {
                true
            }
        });
        detached
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// The leader's side of one fetch: publishes the outcome to everyone who
/// joined, whether or not the entry is still in the map
///
/// Dropped without publishing, it releases the entry and waiters see a closed
/// channel.
pub(crate) struct InFlightGuard {
    map: Arc<InFlightMap>,
    key: String,
    id: u64,
    tx: Option<broadcast::Sender<FetchOutcome>>,
}

impl InFlightGuard {
    pub fn new(map: Arc<InFlightMap>, key: String, ticket: &Ticket) -> Self {
        Self {
            map,
            key,
            id: ticket.id,
            tx: Some(ticket.tx.clone()),
        }
    }

    /// Publish the outcome; returns how many receivers were listening
    pub fn complete(mut self, outcome: FetchOutcome) -> usize {
        // Leave the map first so nobody subscribes after the send
        self.map.release(&self.key, self.id);
        let Some(tx) = self.tx.take() else {
            return 0;
        };
        let waiters = tx.receiver_count();
        let _ = tx.send(outcome);
        debug!(key = %self.key, id = self.id, waiters, "Fetch outcome published");
        waiters
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.tx.take().is_some() && self.map.release(&self.key, self.id) {
            debug!(key = %self.key, id = self.id, "In-flight fetch abandoned");
        }
    }
}
