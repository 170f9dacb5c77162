//! Resilient channel: handle plus the reconnect state machine task

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{CONNECTED, DISCONNECTED, Event, EventBus, MalformedMessage, RECONNECT_FAILED, Subscription, SubscriptionId};

use super::backoff::Backoff;
use super::config::ChannelConfig;
use super::error::ChannelError;
use super::state::{ChannelMetrics, ChannelState, ChannelStatus, MetricsInner};
use super::transport::{Connector, InboundFrame, Link};

/// Requests from handles to the driver task
#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    /// A send found the link dead; ignored unless `generation` is still current
    SendFailed { generation: u64 },
    Shutdown,
}

/// Sender for the current link, tagged with the link it belongs to
struct Outbound {
    generation: u64,
    tx: mpsc::Sender<String>,
}

/// State shared by the handle and the driver
struct Shared {
    bus: EventBus,
    metrics: MetricsInner,
    outbound: Mutex<Option<Outbound>>,
    max_frame_bytes: usize,
}

impl Shared {
    fn outbound(&self) -> MutexGuard<'_, Option<Outbound>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Push-update connection that survives drops
///
/// Subscriptions live on a local [`EventBus`] and are independent of the
/// connection: register handlers before the first `connect()` and they keep
/// receiving across reconnects. Cheap to clone; the state machine task stops
/// on `shutdown()` or when the last handle is dropped.
#[derive(Clone)]
pub struct ResilientChannel {
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ChannelStatus>,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ResilientChannel {
    /// Create the channel and start its state machine in `Disconnected`
    pub fn new(config: &ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_bus(config, connector, EventBus::with_default_capacity("channel"))
    }

    pub fn with_bus(config: &ChannelConfig, connector: Arc<dyn Connector>, bus: EventBus) -> Self {
        debug!(endpoint = %config.endpoint, "ResilientChannel::new: called");
        let shared = Arc::new(Shared {
            bus,
            metrics: MetricsInner::default(),
            outbound: Mutex::new(None),
            max_frame_bytes: config.max_frame_bytes,
        });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::default());

        let driver = Driver {
            endpoint: config.endpoint.clone(),
            connector,
            backoff: config.backoff(),
            shared: Arc::clone(&shared),
            cmd_rx,
            status_tx,
            attempt: 0,
            exhausted: false,
            generation: 0,
        };
        let handle = tokio::spawn(driver.run());

        Self {
            shared,
            cmd_tx,
            status_rx,
            driver: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Begin connecting; a no-op while `Connected` or `Connecting`
    ///
    /// From `Disconnected` this resets the attempt counter. During `Backoff`
    /// it skips the remaining delay. Returns false once the channel is shut down.
    pub fn connect(&self) -> bool {
        debug!("ResilientChannel::connect: called");
        self.cmd_tx.send(Command::Connect).is_ok()
    }

    /// Close the link and cancel any pending retry
    pub fn disconnect(&self) -> bool {
        debug!("ResilientChannel::disconnect: called");
        self.cmd_tx.send(Command::Disconnect).is_ok()
    }

    /// Queue one message for the remote end without blocking
    ///
    /// False when not connected, when the link's buffer is full, or when the
    /// link turns out to be dead (which also starts reconnection).
    pub fn send(&self, kind: &str, payload: Value) -> bool {
        let line = match Event::new(kind, payload).to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(%kind, error = %e, "Failed to serialize outbound message");
                return false;
            }
        };

        let guard = self.shared.outbound();
        let Some(outbound) = guard.as_ref() else {
            debug!(%kind, "ResilientChannel::send: not connected");
            return false;
        };

        match outbound.tx.try_send(line) {
            Ok(()) => {
                MetricsInner::bump(&self.shared.metrics.sent);
                true
            }
            Err(TrySendError::Full(_)) => {
                MetricsInner::bump(&self.shared.metrics.send_failures);
                warn!(%kind, "Send buffer full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                MetricsInner::bump(&self.shared.metrics.send_failures);
                let generation = outbound.generation;
                drop(guard);
                warn!(%kind, "Send failed on dead link");
                let _ = self.cmd_tx.send(Command::SendFailed { generation });
                false
            }
        }
    }

    /// Register a callback for inbound messages (or connectivity events) of `event`
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.bus.on(event, callback)
    }

    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        self.shared.bus.off(event, id)
    }

    /// Stream of every event the channel dispatches
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn status(&self) -> ChannelStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch state transitions
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    pub fn metrics(&self) -> ChannelMetrics {
        self.shared.metrics.snapshot()
    }

    /// Stop the state machine and close the link; safe to call more than once
    pub async fn shutdown(&self) {
        let handle = self.driver.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(handle) = handle else {
            return;
        };
        debug!("ResilientChannel::shutdown: called");
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Err(e) = handle.await {
            warn!(error = %e, "Channel driver task failed");
        }
    }
}

/// Where the state machine is; `Connected` owns the live inbound side
enum Phase {
    Disconnected,
    Connecting,
    Connected(mpsc::Receiver<InboundFrame>),
    Backoff(Instant),
}

enum ConnectStep {
    Done(Result<Link, ChannelError>),
    Abort,
    Stop,
}

enum LinkStep {
    Frame(Option<InboundFrame>),
    Command(Option<Command>),
}

struct Driver {
    endpoint: String,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    shared: Arc<Shared>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ChannelStatus>,
    attempt: u32,
    exhausted: bool,
    generation: u64,
}

impl Driver {
    async fn run(mut self) {
        debug!(endpoint = %self.endpoint, "Channel driver started");
        let mut phase = Phase::Disconnected;

        loop {
            phase = match phase {
                Phase::Disconnected => match self.cmd_rx.recv().await {
                    Some(Command::Connect) => {
                        self.attempt = 0;
                        self.exhausted = false;
                        Phase::Connecting
                    }
                    Some(Command::Disconnect | Command::SendFailed { .. }) => Phase::Disconnected,
                    Some(Command::Shutdown) | None => break,
                },

                Phase::Connecting => {
                    self.publish(ChannelState::Connecting, None);
                    match self.try_connect().await {
                        ConnectStep::Done(Ok(link)) => self.on_connected(link),
                        ConnectStep::Done(Err(e)) => {
                            warn!(endpoint = %self.endpoint, attempt = self.attempt, error = %e, "Connect failed");
                            self.schedule_retry()
                        }
                        ConnectStep::Abort => {
                            self.publish(ChannelState::Disconnected, None);
                            Phase::Disconnected
                        }
                        ConnectStep::Stop => break,
                    }
                }

                Phase::Connected(mut inbound) => {
                    let step = tokio::select! {
                        frame = inbound.recv() => LinkStep::Frame(frame),
                        cmd = self.cmd_rx.recv() => LinkStep::Command(cmd),
                    };
                    match step {
                        LinkStep::Frame(Some(frame)) => {
                            self.dispatch(frame);
                            Phase::Connected(inbound)
                        }
                        LinkStep::Frame(None) => self.on_dropped("connection closed"),
                        LinkStep::Command(Some(Command::Connect)) => Phase::Connected(inbound),
                        LinkStep::Command(Some(Command::SendFailed { generation })) => {
                            if generation == self.generation {
                                self.on_dropped("send failed")
                            } else {
                                Phase::Connected(inbound)
                            }
                        }
                        LinkStep::Command(Some(Command::Disconnect)) => {
                            self.close_link("disconnect requested");
                            self.publish(ChannelState::Disconnected, None);
                            Phase::Disconnected
                        }
                        LinkStep::Command(Some(Command::Shutdown) | None) => {
                            self.close_link("shutdown");
                            break;
                        }
                    }
                }

                Phase::Backoff(until) => {
                    let cmd = tokio::select! {
                        _ = tokio::time::sleep_until(until) => None,
                        cmd = self.cmd_rx.recv() => Some(cmd),
                    };
                    match cmd {
                        None => Phase::Connecting,
                        Some(Some(Command::Connect)) => {
                            debug!(attempt = self.attempt, "Manual connect during backoff, retrying now");
                            Phase::Connecting
                        }
                        Some(Some(Command::SendFailed { .. })) => Phase::Backoff(until),
                        Some(Some(Command::Disconnect)) => {
                            info!("Pending reconnection cancelled");
                            self.publish(ChannelState::Disconnected, None);
                            Phase::Disconnected
                        }
                        Some(Some(Command::Shutdown) | None) => break,
                    }
                }
            };
        }

        self.publish(ChannelState::Disconnected, None);
        debug!(endpoint = %self.endpoint, "Channel driver stopped");
    }

    /// Await the connector while still honoring commands
    async fn try_connect(&mut self) -> ConnectStep {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let connect = connector.connect(&endpoint);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => return ConnectStep::Done(result),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect | Command::SendFailed { .. }) => continue,
                    Some(Command::Disconnect) => return ConnectStep::Abort,
                    Some(Command::Shutdown) | None => return ConnectStep::Stop,
                },
            }
        }
    }

    fn on_connected(&mut self, link: Link) -> Phase {
        self.generation += 1;
        *self.shared.outbound() = Some(Outbound {
            generation: self.generation,
            tx: link.outbound,
        });
        self.attempt = 0;
        self.exhausted = false;
        MetricsInner::bump(&self.shared.metrics.connects);
        self.publish(ChannelState::Connected, None);

        info!(endpoint = %self.endpoint, "Channel connected");
        self.shared
            .bus
            .emit(&Event::new(CONNECTED, json!({ "endpoint": self.endpoint })));
        Phase::Connected(link.inbound)
    }

    fn close_link(&mut self, reason: &str) {
        if self.shared.outbound().take().is_some() {
            info!(endpoint = %self.endpoint, %reason, "Channel disconnected");
            self.shared
                .bus
                .emit(&Event::new(DISCONNECTED, json!({ "reason": reason })));
        }
    }

    fn on_dropped(&mut self, reason: &str) -> Phase {
        MetricsInner::bump(&self.shared.metrics.drops);
        warn!(endpoint = %self.endpoint, %reason, "Channel dropped");
        self.close_link(reason);
        self.schedule_retry()
    }

    /// Enter backoff for the next attempt, or give up past the ceiling
    fn schedule_retry(&mut self) -> Phase {
        let next = self.attempt.saturating_add(1);
        if self.backoff.exhausted(next) {
            self.exhausted = true;
            self.publish(ChannelState::Disconnected, None);
            warn!(endpoint = %self.endpoint, attempts = self.attempt, "Reconnection gave up");
            self.shared.bus.emit(&Event::new(
                RECONNECT_FAILED,
                json!({ "attempts": self.attempt, "endpoint": self.endpoint }),
            ));
            return Phase::Disconnected;
        }

        self.attempt = next;
        let delay = self.backoff.delay(next);
        let until = Instant::now() + delay;
        self.publish(ChannelState::Backoff, Some(until));
        info!(attempt = next, ?delay, "Reconnecting after delay");
        Phase::Backoff(until)
    }

    fn dispatch(&self, frame: InboundFrame) {
        let parsed = frame.and_then(|line| {
            if line.trim().is_empty() {
                return Ok(None);
            }
            if line.len() > self.shared.max_frame_bytes {
                return Err(MalformedMessage::TooLarge {
                    max: self.shared.max_frame_bytes,
                });
            }
            Event::parse(&line).map(Some)
        });

        match parsed {
            Ok(None) => debug!("Channel: keep-alive"),
            Ok(Some(event)) if event.is_connectivity() => {
                MetricsInner::bump(&self.shared.metrics.malformed);
                warn!(kind = %event.kind, "Dropping remote message using a reserved event name");
            }
            Ok(Some(event)) => {
                MetricsInner::bump(&self.shared.metrics.received);
                let delivered = self.shared.bus.emit(&event);
                debug!(kind = %event.kind, delivered, "Channel: dispatched");
            }
            Err(e) => {
                MetricsInner::bump(&self.shared.metrics.malformed);
                warn!(error = %e, "Dropping malformed message");
            }
        }
    }

    fn publish(&self, state: ChannelState, next_retry_at: Option<Instant>) {
        self.status_tx.send_replace(ChannelStatus {
            state,
            attempt: self.attempt,
            next_retry_at,
            exhausted: self.exhausted,
        });
    }
}
