//! Error types for fetches, mutations and coordinator operations

use std::time::Duration;
use thiserror::Error;

/// Errors produced by a remote call or a queued unit of work
///
/// `Clone` so one de-duplicated outcome can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Service reported failure: {0}")]
    Service(String),

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request queue closed")]
    QueueClosed,

    #[error("Fetch ended without a result")]
    Aborted,
}

impl FetchError {
    /// Whether the remote service itself answered with `success: false`
    pub fn is_service_failure(&self) -> bool {
        matches!(self, FetchError::Service(_))
    }

    /// Whether the failure came from the caller-supplied time bound
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::InvalidResponse(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::InvalidResponse(e.to_string())
    }
}

/// Errors surfaced to Coordinator callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error("Fetch failed for {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: FetchError,
    },

    #[error("Mutation failed: {0}")]
    Mutation(#[source] FetchError),

    #[error("Coordinator shut down")]
    Shutdown,
}

impl CoordError {
    /// The underlying fetch/mutation failure, if any
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            CoordError::Fetch { source, .. } => Some(source),
            CoordError::Mutation(source) => Some(source),
            CoordError::Shutdown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_messages() {
        let err = FetchError::Http {
            status: 503,
            message: "upstream unavailable".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("upstream unavailable"));

        let err = FetchError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
        assert!(err.is_timeout());
        assert!(!err.is_service_failure());
    }

    #[test]
    fn test_coord_error_exposes_source() {
        let err = CoordError::Fetch {
            key: "truck-1".to_string(),
            source: FetchError::Service("not found".to_string()),
        };
        assert!(err.to_string().contains("truck-1"));
        assert_eq!(err.fetch_error(), Some(&FetchError::Service("not found".to_string())));
        assert_eq!(CoordError::Shutdown.fetch_error(), None);
    }

    #[test]
    fn test_json_error_maps_to_invalid_response() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: FetchError = parse.into();
        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }
}
