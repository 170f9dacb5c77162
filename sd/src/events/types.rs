//! Event types shared by the push channel and the coordinator bus
//!
//! The same shape travels on the wire (`{"type", "data", "timestamp"}`, one JSON
//! object per line) and through local fan-out, so relaying an inbound push update
//! to UI subscribers never needs a translation step.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Local connectivity event: the channel reached `Connected`
pub const CONNECTED: &str = "connected";

/// Local connectivity event: an established connection was lost or closed
pub const DISCONNECTED: &str = "disconnected";

/// Local connectivity event: reconnection gave up after the attempt ceiling
pub const RECONNECT_FAILED: &str = "reconnect-failed";

/// Coordinator event: a mutation succeeded and its invalidation ran
pub const MUTATION_SUCCEEDED: &str = "mutation-succeeded";

/// Coordinator event: a degraded-mode poller refreshed a key
pub const POLL_REFRESHED: &str = "poll-refreshed";

/// A typed message: the unit of both wire traffic and local fan-out
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name used for dispatch
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque payload
    #[serde(default)]
    pub data: Value,

    /// Unix milliseconds at creation
    #[serde(default)]
    pub timestamp: i64,
}

/// Why an inbound line could not become an [`Event`]
#[derive(Debug, Error)]
pub enum MalformedMessage {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing or empty `type` field")]
    MissingType,

    #[error("frame exceeds limit of {max} bytes")]
    TooLarge { max: usize },

    #[error("frame is not valid UTF-8")]
    Encoding,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Parse one wire line
    pub fn parse(line: &str) -> Result<Self, MalformedMessage> {
        let event: Event = serde_json::from_str(line)?;
        if event.kind.trim().is_empty() {
            return Err(MalformedMessage::MissingType);
        }
        Ok(event)
    }

    /// Serialize to a single wire line (no trailing newline)
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this is one of the channel's own connectivity events
    pub fn is_connectivity(&self) -> bool {
        matches!(self.kind.as_str(), CONNECTED | DISCONNECTED | RECONNECT_FAILED)
    }
}
