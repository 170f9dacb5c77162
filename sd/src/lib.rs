//! SyncDeck - client-side data orchestration
//!
//! SyncDeck keeps a client's view of remote data fresh without flooding the
//! remote service. Reads go through a time-bounded cache, outbound calls are
//! throttled by a bounded queue, and a push channel invalidates cached data
//! when the server announces changes.
//!
//! # Core Concepts
//!
//! - **Read-through**: a cache miss fetches once, even with many concurrent callers
//! - **Invalidate on write**: a successful mutation drops the keys it affects
//! - **Push invalidation**: server messages invalidate keys, then reach subscribers
//! - **Degraded mode**: when the channel gives up, registered pollers take over
//!
//! # Modules
//!
//! - [`cache`] - Expiring cache with per-key TTL
//! - [`queue`] - Bounded FIFO request queue
//! - [`channel`] - Push channel with exponential-backoff reconnection
//! - [`coordinator`] - The context object composing all three
//! - [`events`] - Event type and isolated fan-out bus
//! - [`services`] - Remote service envelope and HTTP client
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cache;
pub mod channel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod queue;
pub mod services;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, DataClass, ExpiringCache, KeyPattern};
pub use channel::{ChannelConfig, ChannelState, ChannelStatus, Connector, ResilientChannel, TcpConnector};
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorMetrics, CoordinatorState, RelayRule};
pub use error::{CoordError, FetchError};
pub use events::{Event, EventBus, Subscription};
pub use queue::{QueueConfig, QueueState, RequestQueue};
pub use services::{HttpService, RemoteService, ServiceResponse};
