//! Cache entry with an absolute expiry instant

use std::time::Duration;

use tokio::time::Instant;

/// Upper bound for expiry when `now + ttl` would overflow
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A stored value and the instant after which it must not be returned
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Create an entry expiring `ttl` from now
    pub fn new(key: impl Into<String>, value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self {
            key: key.into(),
            value,
            expires_at,
        }
    }

    /// Fresh strictly before the expiry instant
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}
