//! Expiring Cache
//!
//! Per-key TTL chosen at write time; reads past expiry are misses and evict.

mod config;
mod entry;
mod pattern;
mod store;

pub use config::{CacheConfig, DataClass};
pub use entry::CacheEntry;
pub use pattern::KeyPattern;
pub use store::{CacheStats, ExpiringCache, spawn_sweeper};
