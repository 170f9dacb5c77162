//! Coordinator
//!
//! One context object joining the cache, the request queue and the push
//! channel. Reads go through the cache and the queue, writes invalidate, and
//! push updates invalidate and then reach local subscribers.
//!
//! ```text
//!   read_through ──► ExpiringCache ──miss──► InFlightMap ──► RequestQueue ──► fetcher
//!   mutate ────────► operation ──ok──► invalidate + mutation-succeeded
//!   push message ──► relay ──► invalidate ──► coordinator bus
//! ```

mod config;
mod core;
mod inflight;
mod state;

pub use config::{CoordinatorConfig, RelayRule};
pub use core::Coordinator;
pub use state::{CoordinatorMetrics, CoordinatorState};
