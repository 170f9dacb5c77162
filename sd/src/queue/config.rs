//! Request queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Max concurrently running fetches
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Default per-fetch timeout in milliseconds
    #[serde(rename = "fetch-timeout-ms", default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl QueueConfig {
    /// Get the default fetch timeout as a Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
