//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::KeyPattern;

/// Channel event whose arrival invalidates cache keys before fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRule {
    /// Channel event name, e.g. `fleet-update`
    pub event: String,

    /// Keys to drop when the event arrives
    #[serde(default)]
    pub invalidate: Vec<KeyPattern>,
}

impl RelayRule {
    pub fn new(event: impl Into<String>, invalidate: &[&str]) -> Self {
        Self {
            event: event.into(),
            invalidate: KeyPattern::parse_all(invalidate),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Connect the channel during initialize
    #[serde(rename = "auto-connect", default = "default_auto_connect")]
    pub auto_connect: bool,

    /// Broadcast capacity of the coordinator event stream
    #[serde(rename = "event-capacity", default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Polling period while the channel has given up reconnecting
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Channel events relayed to local subscribers
    #[serde(default = "default_relays")]
    pub relays: Vec<RelayRule>,
}

fn default_auto_connect() -> bool {
    true
}

fn default_event_capacity() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_relays() -> Vec<RelayRule> {
    vec![
        RelayRule::new("fleet-update", &["fleet*"]),
        RelayRule::new("quote-update", &["quote*"]),
        RelayRule::new("campaign-update", &["campaign*"]),
    ]
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            auto_connect: default_auto_connect(),
            event_capacity: default_event_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            relays: default_relays(),
        }
    }
}

impl CoordinatorConfig {
    /// Get the polling period as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
