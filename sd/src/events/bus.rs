//! Event Bus - named-event fan-out with per-listener isolation
//!
//! Two consumer styles share one bus:
//! - callbacks registered per event name with [`EventBus::on`], invoked synchronously
//!   on [`EventBus::emit`]
//! - async consumers holding a [`broadcast::Receiver`] from [`EventBus::subscribe`],
//!   which see every emitted event regardless of name
//!
//! Every callback runs inside `catch_unwind`: a panicking listener is logged and
//! counted, its siblings still run, and the emitter never observes the panic.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::Event;

/// Default broadcast capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Listener callback
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registry {
    name: &'static str,
    listeners: Mutex<HashMap<String, Vec<(SubscriptionId, Callback)>>>,
    next_id: AtomicU64,
    panics: AtomicU64,
    tx: broadcast::Sender<Event>,
}

impl Registry {
    fn listeners(&self) -> MutexGuard<'_, HashMap<String, Vec<(SubscriptionId, Callback)>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, event: &str, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }
}

/// Central fan-out point; cheap to clone, clones share listeners
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    /// Create a new bus; `name` tags its log lines
    pub fn new(name: &'static str, capacity: usize) -> Self {
        debug!(name, capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            registry: Arc::new(Registry {
                name,
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                panics: AtomicU64::new(0),
                tx,
            }),
        }
    }

    /// Create a new bus with default capacity
    pub fn with_default_capacity(name: &'static str) -> Self {
        Self::new(name, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Register a callback for one event name
    ///
    /// Subscribing is independent of any connection state: listeners may be
    /// registered before anything is ever emitted.
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(bus = self.registry.name, %event, ?id, "EventBus::on");
        self.registry
            .listeners()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event: event.to_string(),
            id,
        }
    }

    /// Remove a callback; returns whether it was registered
    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        debug!(bus = self.registry.name, %event, ?id, "EventBus::off");
        self.registry.remove(event, id)
    }

    /// Deliver an event to every listener of its name and to all stream subscribers
    ///
    /// Returns the number of callbacks that ran to completion.
    pub fn emit(&self, event: &Event) -> usize {
        // Snapshot so callbacks can re-enter the bus without deadlocking
        let callbacks: Vec<Callback> = self
            .registry
            .listeners()
            .get(&event.kind)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        debug!(
            bus = self.registry.name,
            event = %event.kind,
            listeners = callbacks.len(),
            "EventBus::emit"
        );

        // No stream subscribers is fine
        let _ = self.registry.tx.send(event.clone());

        let mut delivered = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback.as_ref()(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    self.registry.panics.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        bus = self.registry.name,
                        event = %event.kind,
                        panic = %panic_message(payload.as_ref()),
                        "Listener panicked; remaining listeners still invoked"
                    );
                }
            }
        }
        delivered
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        debug!(bus = self.registry.name, "EventBus::subscribe: new stream subscriber");
        self.registry.tx.subscribe()
    }

    /// Number of callbacks registered for an event name
    pub fn listener_count(&self, event: &str) -> usize {
        self.registry.listeners().get(event).map(Vec::len).unwrap_or(0)
    }

    /// Number of live stream subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry.tx.receiver_count()
    }

    /// Total listener panics caught so far
    pub fn panic_count(&self) -> u64 {
        self.registry.panics.load(Ordering::Relaxed)
    }

    /// Drop every registered callback
    pub fn clear(&self) {
        debug!(bus = self.registry.name, "EventBus::clear");
        self.registry.listeners().clear();
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.registry.name)
            .field("events", &self.registry.listeners().len())
            .finish()
    }
}

/// Handle returned by [`EventBus::on`]
///
/// Dropping it leaves the callback registered; call [`Subscription::unsubscribe`]
/// to remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    event: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the callback; false if it was already gone or the bus was dropped
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.event, self.id),
            None => false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast::error::TryRecvError;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &Event| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fan_out_to_all_listeners_of_event() {
        let bus = EventBus::new("test", 16);
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let (other, cb_other) = counter();
        let _sa = bus.on("fleet-update", cb_a);
        let _sb = bus.on("fleet-update", cb_b);
        let _so = bus.on("quote-update", cb_other);

        let delivered = bus.emit(&Event::new("fleet-update", json!({"truck": 1})));

        assert_eq!(delivered, 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = EventBus::new("test", 16);
        let (before, cb_before) = counter();
        let (after, cb_after) = counter();
        let _s1 = bus.on("boom", cb_before);
        let _s2 = bus.on("boom", |_: &Event| panic!("listener failure"));
        let _s3 = bus.on("boom", cb_after);

        let delivered = bus.emit(&Event::new("boom", json!(null)));

        assert_eq!(delivered, 2);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(bus.panic_count(), 1);

        // The bus keeps working after a panic
        bus.emit(&Event::new("boom", json!(null)));
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_and_off() {
        let bus = EventBus::new("test", 16);
        let (count, cb) = counter();
        let sub = bus.on("tick", cb);
        let (count2, cb2) = counter();
        let sub2 = bus.on("tick", cb2);
        assert_eq!(bus.listener_count("tick"), 2);

        assert!(sub.unsubscribe());
        assert!(bus.off("tick", sub2.id()));
        assert!(!bus.off("tick", sub2.id()));
        assert_eq!(bus.listener_count("tick"), 0);

        bus.emit(&Event::new("tick", json!(null)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(count2.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_may_reenter_bus() {
        let bus = EventBus::new("test", 16);
        let (count, cb) = counter();
        let _sink = bus.on("second", cb);
        let inner = bus.clone();
        let _relay = bus.on("first", move |event: &Event| {
            inner.emit(&Event::new("second", event.data.clone()));
            let _late = inner.on("third", |_: &Event| {});
        });

        bus.emit(&Event::new("first", json!(1)));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("third"), 1);
    }

    #[tokio::test]
    async fn test_stream_subscribers_receive_every_event() {
        let bus = EventBus::new("test", 16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(&Event::new("a", json!(1)));
        bus.emit(&Event::new("b", json!(2)));

        assert_eq!(rx.recv().await.unwrap().kind, "a");
        assert_eq!(rx.recv().await.unwrap().kind, "b");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_emit_without_listeners_is_noop() {
        let bus = EventBus::new("test", 16);
        assert_eq!(bus.emit(&Event::new("nobody", json!(null))), 0);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus = EventBus::new("test", 16);
        let sub = bus.on("x", |_: &Event| {});
        drop(bus);
        assert!(!sub.unsubscribe());
    }
}
