//! Resilient Channel
//!
//! Push-update connection with exponential-backoff reconnection.
//!
//! ```text
//!   Disconnected ──connect()──► Connecting ──ok──► Connected
//!        ▲                          │                  │ drop / send failure
//!        │ give up                  │ error            ▼
//!        └──────────────────── Backoff ◄───────────────┘
//! ```
//!
//! Attempt `k` waits `base * 2^(k-1)`; past `max-attempts` the channel emits
//! `reconnect-failed` and stays `Disconnected` until the next `connect()`.

mod backoff;
mod config;
mod core;
mod error;
mod state;
mod transport;

pub use backoff::Backoff;
pub use config::ChannelConfig;
pub use core::ResilientChannel;
pub use error::ChannelError;
pub use state::{ChannelMetrics, ChannelState, ChannelStatus};
pub use transport::{Connector, InboundFrame, Link, LinkPeer, TcpConnector, parse_endpoint};

#[cfg(test)]
pub(crate) use transport::mock;
