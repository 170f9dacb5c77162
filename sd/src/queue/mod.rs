//! Bounded Request Queue
//!
//! Caps how many outbound fetches run at once. Work beyond the bound waits in
//! submission order and is admitted as slots free up, whether the running work
//! succeeded, failed or timed out.

mod config;
mod core;
mod task;

pub use config::QueueConfig;
pub use core::RequestQueue;
pub use task::{QueueState, QueueStats};
