//! Transport errors

use std::time::Duration;
use thiserror::Error;

/// Why a connection attempt or an established link failed
///
/// Consumed by the reconnect state machine; callers only see connectivity events.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel closed")]
    Closed,
}
