//! Request queue implementation

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::FetchError;

use super::config::QueueConfig;
use super::task::{QueueState, QueueStats, QueuedTask};

/// Internal state protected by mutex
struct QueueInner {
    /// Occupied slots (never above `max_concurrent`)
    running: usize,

    /// Submissions waiting for a slot, oldest first
    waiting: VecDeque<QueuedTask<SlotPermit>>,

    closed: bool,

    stats: QueueStats,
}

type Shared = Arc<Mutex<QueueInner>>;

fn lock(shared: &Shared) -> MutexGuard<'_, QueueInner> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An occupied slot. Dropping it hands the slot to the oldest live waiter, or
/// frees it when nobody is waiting.
struct SlotPermit {
    shared: Option<Shared>,
}

impl SlotPermit {
    fn new(shared: Shared) -> Self {
        Self { shared: Some(shared) }
    }

    /// Forget the slot without releasing it (it is still owned by the caller of `release`)
    fn disarm(mut self) {
        self.shared = None;
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            release(&shared);
        }
    }
}

fn release(shared: &Shared) {
    loop {
        let task = {
            let mut inner = lock(shared);
            match inner.waiting.pop_front() {
                Some(task) => task,
                None => {
                    inner.running = inner.running.saturating_sub(1);
                    return;
                }
            }
        };

        // Send outside the lock; the slot stays counted as running during hand-off
        match task.ready_tx.send(SlotPermit::new(Arc::clone(shared))) {
            Ok(()) => {
                debug!(task_id = %task.id, waited = ?task.submitted_at.elapsed(), "RequestQueue: promoted from queue");
                return;
            }
            Err(permit) => {
                debug!(task_id = %task.id, "RequestQueue: waiter gone, trying next");
                permit.disarm();
            }
        }
    }
}

/// Concurrency limiter for outbound calls
///
/// At most `max_concurrent` units of work run at once; the rest wait in
/// submission order. The queue never retries: a unit's outcome, success or
/// failure, goes to its own caller only.
#[derive(Clone)]
pub struct RequestQueue {
    max_concurrent: usize,
    default_timeout: Duration,
    shared: Shared,
}

impl RequestQueue {
    /// Create a new queue with the given configuration
    pub fn new(config: &QueueConfig) -> Self {
        debug!(?config, "RequestQueue::new: called");
        Self {
            max_concurrent: config.max_concurrent.max(1),
            default_timeout: config.fetch_timeout(),
            shared: Arc::new(Mutex::new(QueueInner {
                running: 0,
                waiting: VecDeque::new(),
                closed: false,
                stats: QueueStats::default(),
            })),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run `work` once a slot is free, bounded by the default timeout
    pub async fn submit<T, F, Fut>(&self, work: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.submit_with_timeout(self.default_timeout, work).await
    }

    /// Run `work` once a slot is free, failing with `Timeout` if it runs longer than `timeout`
    ///
    /// The timeout covers execution only, not time spent waiting for a slot.
    pub async fn submit_with_timeout<T, F, Fut>(&self, timeout: Duration, work: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let id = Uuid::now_v7();
        let permit = self.acquire(id).await?;

        debug!(task_id = %id, ?timeout, "RequestQueue: running task");
        let result = match tokio::time::timeout(timeout, work()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(task_id = %id, ?timeout, "RequestQueue: task timed out");
                Err(FetchError::Timeout(timeout))
            }
        };

        self.record(&result);
        drop(permit);
        result
    }

    async fn acquire(&self, id: Uuid) -> Result<SlotPermit, FetchError> {
        let ready_rx = {
            let mut inner = lock(&self.shared);

            if inner.closed {
                debug!(task_id = %id, "RequestQueue::acquire: closed, rejecting");
                inner.stats.total_rejected += 1;
                return Err(FetchError::QueueClosed);
            }

            inner.stats.total_submitted += 1;

            // A free slot implies nobody is waiting, so this preserves FIFO
            if inner.running < self.max_concurrent && inner.waiting.is_empty() {
                inner.running += 1;
                inner.stats.peak_concurrent = inner.stats.peak_concurrent.max(inner.running);
                debug!(task_id = %id, running = inner.running, "RequestQueue::acquire: slot free");
                return Ok(SlotPermit::new(Arc::clone(&self.shared)));
            }

            let (ready_tx, ready_rx) = oneshot::channel();
            inner.waiting.push_back(QueuedTask {
                id,
                submitted_at: Instant::now(),
                ready_tx,
            });
            inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.waiting.len());
            debug!(task_id = %id, position = inner.waiting.len(), "RequestQueue::acquire: queued");
            ready_rx
        };

        ready_rx.await.map_err(|_| FetchError::QueueClosed)
    }

    fn record<T>(&self, result: &Result<T, FetchError>) {
        let mut inner = lock(&self.shared);
        match result {
            Ok(_) => inner.stats.total_completed += 1,
            Err(FetchError::Timeout(_)) => {
                inner.stats.total_failed += 1;
                inner.stats.total_timed_out += 1;
            }
            Err(_) => inner.stats.total_failed += 1,
        }
    }

    /// Reject new submissions and fail every waiting one with `QueueClosed`
    ///
    /// Running units finish normally. Returns how many waiters were cancelled.
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = lock(&self.shared);
            inner.closed = true;
            inner.waiting.drain(..).collect()
        };
        let cancelled = drained.len();
        drop(drained);
        info!(cancelled, "Request queue closed");
        cancelled
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    /// Get current queue state
    pub fn queue_state(&self) -> QueueState {
        let inner = lock(&self.shared);
        QueueState {
            running: inner.running,
            queued: inner.waiting.len(),
            max_concurrent: self.max_concurrent,
            closed: inner.closed,
            stats: inner.stats.clone(),
        }
    }

    pub fn stats(&self) -> QueueStats {
        lock(&self.shared).stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue(max_concurrent: usize) -> RequestQueue {
        RequestQueue::new(&QueueConfig {
            max_concurrent,
            ..Default::default()
        })
    }

    /// Tracks how many tasks run at once
    #[derive(Clone, Default)]
    struct Gauge {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Gauge {
        async fn run_for(&self, duration: Duration) -> Result<(), FetchError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_respected_and_all_resolve() {
        let queue = queue(2);
        let gauge = Gauge::default();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            let gauge = gauge.clone();
            handles.push(tokio::spawn(async move {
                queue.submit(|| gauge.run_for(Duration::from_millis(100))).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = queue.queue_state();
        assert_eq!(state.running, 2);
        assert_eq!(state.queued, 1);
        assert_eq!(gauge.current.load(Ordering::SeqCst), 2);

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);

        let state = queue.queue_state();
        assert_eq!(state.running, 0);
        assert_eq!(state.queued, 0);
        assert_eq!(state.stats.total_completed, 3);
        assert_eq!(state.stats.peak_concurrent, 2);
        assert_eq!(state.stats.peak_queue_depth, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_admission_order() {
        let queue = queue(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let queue = queue.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                queue
                    .submit(|| async move {
                        order.lock().unwrap().push(i);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, FetchError>(i)
                    })
                    .await
            }));
            // Let the task reach the queue before the next submission
            tokio::task::yield_now().await;
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Ok(i));
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stall_queue() {
        let queue = queue(1);

        let failing = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .submit(|| async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err::<u32, _>(FetchError::Service("boom".to_string()))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let next = queue.submit(|| async { Ok::<_, FetchError>(7) }).await;

        assert_eq!(failing.await.unwrap(), Err(FetchError::Service("boom".to_string())));
        assert_eq!(next, Ok(7));
        let stats = queue.stats();
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_slot() {
        let queue = queue(1);

        let hung = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .submit_with_timeout(Duration::from_millis(100), || async {
                        std::future::pending::<Result<(), FetchError>>().await
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let started = Instant::now();
        let next = queue.submit(|| async { Ok::<_, FetchError>("ran") }).await;

        assert_eq!(next, Ok("ran"));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(hung.await.unwrap(), Err(FetchError::Timeout(Duration::from_millis(100))));
        assert_eq!(queue.stats().total_timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_fails_waiters_and_rejects_new_work() {
        let queue = queue(1);

        let running = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .submit(|| async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, FetchError>("done")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit(|| async { Ok::<_, FetchError>("never") }).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(queue.queue_state().queued, 1);

        assert_eq!(queue.close(), 1);
        assert!(queue.is_closed());

        assert_eq!(waiting.await.unwrap(), Err(FetchError::QueueClosed));
        assert_eq!(
            queue.submit(|| async { Ok::<_, FetchError>("late") }).await,
            Err(FetchError::QueueClosed)
        );
        assert_eq!(running.await.unwrap(), Ok("done"));

        let state = queue.queue_state();
        assert_eq!(state.running, 0);
        assert_eq!(state.stats.total_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_waiter_is_skipped() {
        let queue = queue(1);

        let blocker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .submit(|| async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, FetchError>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let abandoned = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit(|| async { Ok::<_, FetchError>(()) }).await })
        };
        tokio::task::yield_now().await;
        abandoned.abort();

        blocker.await.unwrap().unwrap();

        let state = queue.queue_state();
        assert_eq!(state.running, 0);
        assert_eq!(state.queued, 0);
        assert_eq!(queue.submit(|| async { Ok::<_, FetchError>(1) }).await, Ok(1));
    }

    #[tokio::test]
    async fn test_zero_bound_is_clamped() {
        let queue = queue(0);
        assert_eq!(queue.max_concurrent(), 1);
        assert_eq!(queue.submit(|| async { Ok::<_, FetchError>(()) }).await, Ok(()));
    }

    proptest! {
        #[test]
        fn prop_bound_holds_and_every_task_resolves(
            max_concurrent in 1usize..4,
            tasks in prop::collection::vec((0u64..50, any::<bool>()), 1..20),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let queue = queue(max_concurrent);
                let gauge = Gauge::default();

                let mut handles = Vec::new();
                for (i, (ms, fail)) in tasks.iter().copied().enumerate() {
                    let queue = queue.clone();
                    let gauge = gauge.clone();
                    handles.push(tokio::spawn(async move {
                        queue
                            .submit(move || async move {
                                gauge.run_for(Duration::from_millis(ms)).await.unwrap();
                                if fail {
                                    Err(FetchError::Service(format!("task {i}")))
                                } else {
                                    Ok(i)
                                }
                            })
                            .await
                    }));
                }

                for (i, handle) in handles.into_iter().enumerate() {
                    let expected = if tasks[i].1 {
                        Err(FetchError::Service(format!("task {i}")))
                    } else {
                        Ok(i)
                    };
                    prop_assert_eq!(handle.await.unwrap(), expected);
                }

                prop_assert!(gauge.peak.load(Ordering::SeqCst) <= max_concurrent);
                let state = queue.queue_state();
                prop_assert_eq!(state.running, 0);
                prop_assert_eq!(state.queued, 0);
                prop_assert!(state.stats.peak_concurrent <= max_concurrent);
                let failures = tasks.iter().filter(|(_, fail)| *fail).count() as u64;
                prop_assert_eq!(state.stats.total_failed, failures);
                prop_assert_eq!(state.stats.total_completed, tasks.len() as u64 - failures);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
