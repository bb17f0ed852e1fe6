//! Category-keyed publish/subscribe for out-of-band runtime events
//!
//! Listeners run synchronously on the publishing task, in subscription order.
//! A listener that blocks stalls every other event and reply on the same
//! connection, so anything slow should go through [`EventBroker::watch`]
//! instead.

use crate::protocol::Term;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Well-known event categories
pub mod categories {
    /// Build progress and completion
    pub const BUILD: &str = "build";
    /// Debugger events
    pub const DEBUG: &str = "debug";
    /// Node console output
    pub const STDOUT: &str = "stdout";
    /// Node error output
    pub const STDERR: &str = "stderr";
    /// Locally synthesized runtime lifecycle events
    pub const LIFECYCLE: &str = "lifecycle";
    /// Node system monitor reports
    pub const SYSTEM: &str = "system";
}

/// Payload values of `lifecycle` events
pub mod lifecycle {
    pub const RUNTIME_STARTED: &str = "runtime_started";
    pub const CONNECTION_LOST: &str = "connection_lost";
    pub const RUNTIME_DISPOSED: &str = "runtime_disposed";
}

/// Capacity of the broadcast channel behind [`EventBroker::watch`]
const WATCH_CAPACITY: usize = 256;

/// An event delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEvent {
    pub category: String,
    pub payload: Term,
}

impl BrokerEvent {
    /// Payload as text, for stream categories
    pub fn text(&self) -> Option<&str> {
        self.payload.as_str()
    }
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&BrokerEvent) + Send + Sync>;

/// Handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event broker shared by a runtime's channel and its consumers
pub struct EventBroker {
    subscribers: RwLock<HashMap<String, Vec<(SubscriptionId, Listener)>>>,
    next_id: AtomicU64,
    broadcast_tx: broadcast::Sender<BrokerEvent>,
}

impl EventBroker {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            broadcast_tx,
        }
    }

    /// Register `listener` for `category`
    pub fn subscribe<F>(&self, category: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&BrokerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let category = category.into();
        debug!("Subscribing {:?} to '{}'", id, category);
        self.subscribers
            .write()
            .entry(category)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a subscription; returns false if it was not registered
    pub fn unsubscribe(&self, category: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(listeners) = subscribers.get_mut(category) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            subscribers.remove(category);
        }
        removed
    }

    /// Deliver an event to every listener of `category`; returns how many ran
    pub fn publish(&self, category: &str, payload: Term) -> usize {
        let event = BrokerEvent {
            category: category.to_string(),
            payload,
        };

        // Snapshot so listeners may subscribe or unsubscribe while being called
        let listeners: Vec<Listener> = self
            .subscribers
            .read()
            .get(category)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!("Listener for '{}' panicked", category);
            }
        }

        let _ = self.broadcast_tx.send(event);
        listeners.len()
    }

    /// Receive every published event on an async consumer
    pub fn watch(&self) -> broadcast::Receiver<BrokerEvent> {
        self.broadcast_tx.subscribe()
    }

    pub fn listener_count(&self, category: &str) -> usize {
        self.subscribers
            .read()
            .get(category)
            .map_or(0, |entries| entries.len())
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |tag: &str| -> Listener {
            let log = Arc::clone(&log_clone);
            let tag = tag.to_string();
            Arc::new(move |event: &BrokerEvent| {
                log.lock().push(format!("{tag}:{}", event.payload));
            })
        };
        (log, make)
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        let first = make("a");
        let second = make("b");
        broker.subscribe(categories::BUILD, move |e| first(e));
        broker.subscribe(categories::BUILD, move |e| second(e));

        assert_eq!(broker.publish(categories::BUILD, json!(1)), 2);
        assert_eq!(*log.lock(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_categories_are_isolated() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        let listener = make("debug");
        broker.subscribe(categories::DEBUG, move |e| listener(e));

        assert_eq!(broker.publish(categories::BUILD, json!("ignored")), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        let listener = make("x");
        let id = broker.subscribe("build", move |e| listener(e));

        assert!(broker.unsubscribe("build", id));
        assert!(!broker.unsubscribe("build", id));
        assert!(!broker.unsubscribe("unknown", id));
        assert_eq!(broker.listener_count("build"), 0);

        broker.publish("build", json!(1));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let broker = Arc::new(EventBroker::new());
        let hits = Arc::new(AtomicU64::new(0));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let b = Arc::clone(&broker);
        let h = Arc::clone(&hits);
        let s = Arc::clone(&slot);
        let id = broker.subscribe("debug", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = s.lock().take() {
                b.unsubscribe("debug", id);
            }
        });
        *slot.lock() = Some(id);

        broker.publish("debug", json!("armed"));
        broker.publish("debug", json!("again"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let broker = EventBroker::new();
        let (log, make) = recorder();
        let after = make("after");
        broker.subscribe("build", |_| panic!("listener bug"));
        broker.subscribe("build", move |e| after(e));

        assert_eq!(broker.publish("build", json!(2)), 2);
        assert_eq!(*log.lock(), vec!["after:2"]);
    }

    #[tokio::test]
    async fn test_watch_receives_all_categories() {
        let broker = EventBroker::new();
        let mut rx = broker.watch();
        broker.publish("stdout", json!("hello"));
        broker.publish("lifecycle", json!(lifecycle::RUNTIME_DISPOSED));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.text(), Some("hello"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.category, "lifecycle");
    }
}
