//! Typed events and the isolated fan-out bus
//!
//! # Architecture
//!
//! ```text
//!   push server ──► ResilientChannel ──► channel EventBus ──► relay handlers
//!                                                                  │
//!                                     invalidate cache ◄───────────┤
//!                                                                  ▼
//!                                                       coordinator EventBus
//!                                                                  │
//!                                     UI callbacks (on) ◄──────────┼──► streams (subscribe)
//! ```
//!
//! Both buses carry the same [`Event`] type; the channel bus sees raw push
//! updates plus connectivity events, the coordinator bus sees what callers
//! should react to.

mod bus;
mod types;

pub use bus::{Callback, DEFAULT_CHANNEL_CAPACITY, EventBus, Subscription, SubscriptionId};
pub use types::{CONNECTED, DISCONNECTED, Event, MUTATION_SUCCEEDED, MalformedMessage, POLL_REFRESHED, RECONNECT_FAILED};
