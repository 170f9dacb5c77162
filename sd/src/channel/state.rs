//! Channel state machine types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::time::Instant;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a reconnection delay
    Backoff,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// Snapshot published on every state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ChannelState,

    /// Consecutive failed reconnection attempts; reset only by a successful connect
    /// or an explicit `connect()` from `Disconnected`
    pub attempt: u32,

    /// When the pending retry fires, while in `Backoff`
    pub next_retry_at: Option<Instant>,

    /// Reconnection gave up after the attempt ceiling
    pub exhausted: bool,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self {
            state: ChannelState::Disconnected,
            attempt: 0,
            next_retry_at: None,
            exhausted: false,
        }
    }
}

impl ChannelStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }
}

#[derive(Debug, Default)]
pub(crate) struct MetricsInner {
    pub received: AtomicU64,
    pub malformed: AtomicU64,
    pub sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub connects: AtomicU64,
    pub drops: AtomicU64,
}

impl MetricsInner {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelMetrics {
        ChannelMetrics {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

/// Channel counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelMetrics {
    /// Well-formed inbound messages dispatched
    pub received: u64,
    /// Inbound lines dropped as malformed
    pub malformed: u64,
    pub sent: u64,
    /// `send` calls that returned false while connected
    pub send_failures: u64,
    /// Successful connections
    pub connects: u64,
    /// Established connections lost
    pub drops: u64,
}
