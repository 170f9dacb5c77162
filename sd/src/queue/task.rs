//! Queue types for the request queue

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// A submission waiting for a free slot
///
/// The slot itself travels through `ready_tx`; dropping the sender without
/// sending fails the waiter with `QueueClosed`.
#[derive(Debug)]
pub(crate) struct QueuedTask<P> {
    pub id: Uuid,
    pub submitted_at: Instant,
    pub ready_tx: oneshot::Sender<P>,
}

/// Statistics for the request queue
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_timed_out: u64,
    pub total_rejected: u64,
    pub peak_concurrent: usize,
    pub peak_queue_depth: usize,
}

/// Point-in-time queue state
#[derive(Debug, Clone)]
pub struct QueueState {
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub closed: bool,
    pub stats: QueueStats,
}

impl QueueState {
    /// Free slots right now
    pub fn available(&self) -> usize {
        self.max_concurrent.saturating_sub(self.running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_slots() {
        let state = QueueState {
            running: 3,
            queued: 0,
            max_concurrent: 5,
            closed: false,
            stats: QueueStats::default(),
        };
        assert_eq!(state.available(), 2);

        let full = QueueState { running: 5, ..state };
        assert_eq!(full.available(), 0);
    }
}
