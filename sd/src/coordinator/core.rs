//! Coordinator implementation

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, CacheStats, DataClass, ExpiringCache, KeyPattern, spawn_sweeper};
use crate::channel::{ChannelStatus, Connector, ResilientChannel};
use crate::config::Config;
use crate::error::{CoordError, FetchError};
use crate::events::{
    CONNECTED, DISCONNECTED, Event, EventBus, MUTATION_SUCCEEDED, POLL_REFRESHED, RECONNECT_FAILED, Subscription,
    SubscriptionId,
};
use crate::queue::{QueueState, RequestQueue};

use super::inflight::{InFlightGuard, InFlightMap, Registration};
use super::state::{CoordinatorMetrics, CoordinatorState, Counters};

struct Inner {
    cache_config: CacheConfig,
    poll_interval: Duration,
    cache: Arc<ExpiringCache<Value>>,
    queue: RequestQueue,
    channel: ResilientChannel,
    bus: EventBus,
    inflight: Arc<InFlightMap>,
    state: Mutex<CoordinatorState>,
    counters: Counters,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
    degraded: watch::Sender<bool>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_degraded(&self, degraded: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            let changed = *current != degraded;
            *current = degraded;
            changed
        });
        if changed {
            if degraded {
                warn!("Push channel gave up; polling fallback active");
            } else {
                info!("Push channel restored; polling fallback paused");
            }
        }
    }

    /// Drop matching cache keys and detach in-flight fetches for them, so
    /// their results stay out of the cache and later reads fetch again
    fn apply_invalidation(&self, patterns: &[KeyPattern]) -> usize {
        let removed = self.cache.invalidate(patterns);
        let detached = self.inflight.mark_stale(patterns);
        debug!(?patterns, removed, detached, "Invalidation applied");
        removed
    }
}

/// The orchestration context: cache, queue and channel behind one API
///
/// Created once with [`Coordinator::initialize`] and passed to whoever needs
/// it; clones share everything. UI code talks only to the coordinator, never
/// to the components directly.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Build every component, install the configured relays and the
    /// connectivity relay, start the sweeper, and connect if configured to
    pub fn initialize(config: &Config, connector: Arc<dyn Connector>) -> Self {
        info!(endpoint = %config.channel.endpoint, "Initializing coordinator");
        let token = CancellationToken::new();
        let cache = Arc::new(ExpiringCache::new());
        let (degraded, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            cache_config: config.cache.clone(),
            poll_interval: config.coordinator.poll_interval(),
            cache: Arc::clone(&cache),
            queue: RequestQueue::new(&config.queue),
            channel: ResilientChannel::new(&config.channel, connector),
            bus: EventBus::new("coordinator", config.coordinator.event_capacity),
            inflight: Arc::new(InFlightMap::new()),
            state: Mutex::new(CoordinatorState::default()),
            counters: Counters::default(),
            token: token.clone(),
            tasks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            degraded,
        });
        let coordinator = Self { inner };

        if let Some(every) = config.cache.sweep_interval() {
            let sweeper = spawn_sweeper(&cache, every, token.child_token());
            coordinator.inner.tasks().push(sweeper);
        }

        coordinator.install_connectivity_relay();
        for rule in &config.coordinator.relays {
            debug!(event = %rule.event, patterns = ?rule.invalidate, "Installing relay");
            coordinator.install_relay(&rule.event, rule.invalidate.clone());
        }

        if config.coordinator.auto_connect {
            coordinator.inner.channel.connect();
        }
        coordinator
    }

    fn ensure_live(&self) -> Result<(), CoordError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            Err(CoordError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn weak(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    /// Cached value for `key`, or fetch it through the queue and cache it for `ttl`
    ///
    /// Concurrent callers for the same missing key share one fetch and receive
    /// the same outcome.
    pub async fn read_through<F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> Result<Value, CoordError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        self.ensure_live()?;
        if let Some(value) = self.inner.cache.get(key) {
            Counters::bump(&self.inner.counters.cache_hits);
            debug!(%key, "Coordinator::read_through: cache hit");
            return Ok(value);
        }
        Counters::bump(&self.inner.counters.cache_misses);
        self.fetch_shared(key, ttl, fetcher, true).await
    }

    /// Read-through using the configured TTL for `class`, recorded in the snapshot
    pub async fn read_class<F, Fut>(&self, class: DataClass, key: &str, fetcher: F) -> Result<Value, CoordError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        let ttl = self.inner.cache_config.ttl_for(class);
        let value = self.read_through(key, ttl, fetcher).await?;
        self.inner.state().record(class, key, value.clone());
        Ok(value)
    }

    /// Fetch `key` even if cached, joining a fetch already in flight
    pub async fn refresh<F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> Result<Value, CoordError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        self.ensure_live()?;
        self.fetch_shared(key, ttl, fetcher, false).await
    }

    async fn fetch_shared<F, Fut>(&self, key: &str, ttl: Duration, fetcher: F, use_cache: bool) -> Result<Value, CoordError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        let mut rx = match self.inner.inflight.register(key) {
            Registration::Follower(rx) => {
                Counters::bump(&self.inner.counters.fetches_joined);
                rx
            }
            Registration::Leader(ticket) => {
                let guard = InFlightGuard::new(Arc::clone(&self.inner.inflight), key.to_string(), &ticket);

                // A fetch may have finished between the cache miss and registering
                if use_cache && let Some(value) = self.inner.cache.get(key) {
                    guard.complete(Ok(value.clone()));
                    return Ok(value);
                }

                Counters::bump(&self.inner.counters.fetches_started);
                let inner = Arc::clone(&self.inner);
                let key = key.to_string();
                let stale = ticket.stale;

                tokio::spawn(async move {
                    let outcome = tokio::select! {
                        biased;
                        _ = inner.token.cancelled() => Err(CoordError::Shutdown),
                        result = inner.queue.submit(fetcher) => result.map_err(|source| CoordError::Fetch {
                            key: key.clone(),
                            source,
                        }),
                    };

                    match &outcome {
                        Ok(_) if stale.load(Ordering::SeqCst) => {
                            debug!(%key, "Fetch finished after invalidation, not caching");
                        }
                        Ok(value) => {
                            inner.cache.set(key.clone(), value.clone(), ttl);
                        }
                        Err(CoordError::Shutdown) => {}
                        Err(e) => {
                            Counters::bump(&inner.counters.fetches_failed);
                            warn!(%key, error = %e, "Fetch failed");
                        }
                    }
                    guard.complete(outcome);
                });

                ticket.rx
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) if self.inner.token.is_cancelled() => Err(CoordError::Shutdown),
            Err(_) => Err(CoordError::Fetch {
                key: key.to_string(),
                source: FetchError::Aborted,
            }),
        }
    }

    /// Run a write directly (bypassing the queue), then invalidate on success
    ///
    /// On failure nothing is invalidated.
    pub async fn mutate<T, F, Fut>(&self, operation: F, invalidate: &[KeyPattern]) -> Result<T, CoordError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.ensure_live()?;
        match operation().await {
            Ok(value) => {
                let removed = self.inner.apply_invalidation(invalidate);
                Counters::bump(&self.inner.counters.mutations_succeeded);
                let keys: Vec<String> = invalidate.iter().map(ToString::to_string).collect();
                info!(?keys, removed, "Mutation succeeded");
                self.inner.bus.emit(&Event::new(
                    MUTATION_SUCCEEDED,
                    json!({ "keys": keys, "invalidated": removed }),
                ));
                Ok(value)
            }
            Err(e) => {
                Counters::bump(&self.inner.counters.mutations_failed);
                warn!(error = %e, "Mutation failed, cache untouched");
                Err(CoordError::Mutation(e))
            }
        }
    }

    /// Invalidate cache keys directly
    pub fn invalidate(&self, patterns: &[KeyPattern]) -> Result<usize, CoordError> {
        self.ensure_live()?;
        Ok(self.inner.apply_invalidation(patterns))
    }

    /// Peek at a fresh cached value without fetching
    pub fn cached(&self, key: &str) -> Option<Value> {
        if self.ensure_live().is_err() {
            return None;
        }
        self.inner.cache.get(key)
    }

    /// Run `handler` for every channel message of type `event`
    pub fn on_channel_event<F>(&self, event: &str, handler: F) -> Result<Subscription, CoordError>
    where
        F: Fn(&Coordinator, &Event) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let weak = self.weak();
        Ok(self.inner.channel.on(event, move |message| {
            if let Some(inner) = weak.upgrade() {
                handler(&Coordinator { inner }, message);
            }
        }))
    }

    /// The standard channel handler: invalidate `patterns`, then fan the
    /// message out on the coordinator bus
    pub fn relay_channel_event(&self, event: &str, patterns: Vec<KeyPattern>) -> Result<Subscription, CoordError> {
        self.ensure_live()?;
        Ok(self.install_relay(event, patterns))
    }

    fn install_relay(&self, event: &str, patterns: Vec<KeyPattern>) -> Subscription {
        let weak = self.weak();
        self.inner.channel.on(event, move |message| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !patterns.is_empty() {
                inner.apply_invalidation(&patterns);
            }
            Counters::bump(&inner.counters.events_relayed);
            inner.bus.emit(message);
        })
    }

    fn install_connectivity_relay(&self) {
        for kind in [CONNECTED, DISCONNECTED, RECONNECT_FAILED] {
            let weak = self.weak();
            self.inner.channel.on(kind, move |event| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match event.kind.as_str() {
                    CONNECTED => inner.set_degraded(false),
                    RECONNECT_FAILED => inner.set_degraded(true),
                    _ => {}
                }
                inner.bus.emit(event);
            });
        }
    }

    /// Register a callback on the coordinator bus
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Result<Subscription, CoordError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.bus.on(event, callback))
    }

    pub fn unsubscribe(&self, event: &str, id: SubscriptionId) -> bool {
        self.inner.bus.off(event, id)
    }

    /// Emit a local event; returns how many callbacks ran
    pub fn emit(&self, event: &str, data: Value) -> Result<usize, CoordError> {
        self.ensure_live()?;
        Ok(self.inner.bus.emit(&Event::new(event, data)))
    }

    /// Stream of every coordinator-bus event
    pub fn events(&self) -> Result<broadcast::Receiver<Event>, CoordError> {
        self.ensure_live()?;
        Ok(self.inner.bus.subscribe())
    }

    pub fn connect(&self) -> Result<(), CoordError> {
        self.ensure_live()?;
        self.inner.channel.connect();
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), CoordError> {
        self.ensure_live()?;
        self.inner.channel.disconnect();
        Ok(())
    }

    /// Push a message upstream; false when not connected or destroyed
    pub fn send(&self, kind: &str, payload: Value) -> bool {
        self.ensure_live().is_ok() && self.inner.channel.send(kind, payload)
    }

    pub fn channel_status(&self) -> ChannelStatus {
        self.inner.channel.status()
    }

    /// Whether the channel has given up and pollers are active
    pub fn is_degraded(&self) -> bool {
        *self.inner.degraded.borrow()
    }

    /// Refresh `key` every poll interval while the channel has given up
    ///
    /// Each successful refresh emits `poll-refreshed`.
    pub fn add_poller<F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Result<(), CoordError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        self.ensure_live()?;
        let weak = self.weak();
        let token = self.inner.token.child_token();
        let mut degraded = self.inner.degraded.subscribe();
        let every = self.inner.poll_interval;
        let key = key.to_string();
        debug!(%key, ?every, "Coordinator::add_poller: called");

        let handle = tokio::spawn(async move {
            'poller: loop {
                while !*degraded.borrow_and_update() {
                    tokio::select! {
                        _ = token.cancelled() => break 'poller,
                        changed = degraded.changed() => if changed.is_err() { break 'poller },
                    }
                }

                // Poll now, then every interval until the channel recovers
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break 'poller,
                        changed = degraded.changed() => {
                            if changed.is_err() {
                                break 'poller;
                            }
                            if !*degraded.borrow_and_update() {
                                continue 'poller;
                            }
                            continue;
                        }
                        _ = interval.tick() => {}
                    }

                    let Some(inner) = weak.upgrade() else {
                        break 'poller;
                    };
                    let coordinator = Coordinator { inner };
                    let fetch = factory();
                    match coordinator.refresh(&key, ttl, move || fetch).await {
                        Ok(_) => {
                            Counters::bump(&coordinator.inner.counters.polls);
                            coordinator.inner.bus.emit(&Event::new(POLL_REFRESHED, json!({ "key": key })));
                        }
                        Err(CoordError::Shutdown) => break 'poller,
                        Err(e) => warn!(%key, error = %e, "Poll refresh failed"),
                    }
                }
            }
            debug!(%key, "Poller stopped");
        });
        self.inner.tasks().push(handle);
        Ok(())
    }

    pub fn snapshot(&self) -> CoordinatorState {
        self.inner.state().clone()
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        self.inner.counters.snapshot()
    }

    pub fn queue_state(&self) -> QueueState {
        self.inner.queue.queue_state()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Tear everything down; later calls are no-ops
    ///
    /// Waiting callers receive `Shutdown`; every later operation does too.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            debug!("Coordinator::destroy: already destroyed");
            return;
        }
        info!("Destroying coordinator");

        self.inner.token.cancel();
        let cancelled = self.inner.queue.close();
        self.inner.channel.bus().clear();
        self.inner.channel.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed during destroy");
            }
        }

        self.inner.inflight.clear();
        self.inner.cache.clear();
        self.inner.bus.clear();
        info!(cancelled, "Coordinator destroyed");
    }
}
