//! Resilient channel configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::Backoff;

/// Push channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Push-update endpoint (`tcp://host:port` or `host:port`)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Delay before the first reconnection attempt
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Reconnection attempts before giving up with `reconnect-failed`
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Optional ceiling on a single backoff delay
    #[serde(rename = "max-delay-ms", default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,

    #[serde(rename = "connect-timeout-ms", default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Outbound lines buffered per connection before `send` starts returning false
    #[serde(rename = "send-buffer", default = "default_send_buffer")]
    pub send_buffer: usize,

    /// Longest inbound line accepted
    #[serde(rename = "max-frame-bytes", default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_endpoint() -> String {
    "tcp://127.0.0.1:7878".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_send_buffer() -> usize {
    256
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
            max_delay_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            send_buffer: default_send_buffer(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ChannelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reconnection policy described by this config
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            self.max_delay_ms.map(Duration::from_millis),
            self.max_attempts,
        )
    }
}
