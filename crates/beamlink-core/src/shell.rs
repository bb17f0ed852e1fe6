//! Interactive shell sessions multiplexed over one channel
//!
//! Every session sees the node's console output; input written through a
//! session is forwarded to the node and recorded in that session's queue.

use crate::broker::{BrokerEvent, EventBroker, SubscriptionId, categories};
use crate::channel::MessageChannel;
use crate::error::{BackendError, BackendResult};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Stream a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IoKind {
    Stdin,
    Stdout,
    Stderr,
}

/// One chunk of console traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoRecord {
    pub kind: IoKind,
    pub text: String,
}

impl IoRecord {
    pub fn new(kind: IoKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Records a session keeps before the oldest ones are dropped
pub const SESSION_CAPACITY: usize = 4096;

/// Ordered record queue of one shell.
///
/// The queue is bounded: once [`SESSION_CAPACITY`] records are waiting,
/// each new record evicts the oldest one. Consumers should drain it.
pub struct ShellSession {
    id: String,
    records: Mutex<VecDeque<IoRecord>>,
    capacity: usize,
    dropped: AtomicU64,
    arrived: Notify,
}

impl ShellSession {
    fn new(id: impl Into<String>) -> Self {
        Self::with_capacity(id, SESSION_CAPACITY)
    }

    fn with_capacity(id: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            arrived: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append a record, evicting the oldest one when full
    pub fn add(&self, kind: IoKind, text: impl Into<String>) {
        {
            let mut records = self.records.lock();
            if records.len() >= self.capacity {
                records.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            records.push_back(IoRecord::new(kind, text));
        }
        self.arrived.notify_waiters();
    }

    /// Records evicted because nobody drained the session
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Take every queued record
    pub fn drain(&self) -> Vec<IoRecord> {
        self.records.lock().drain(..).collect()
    }

    /// Copy of the queue without consuming it
    pub fn snapshot(&self) -> Vec<IoRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Pop the oldest record, waiting at most `timeout` for one to arrive
    pub async fn next_record(&self, timeout: Duration) -> Option<IoRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrived.notified();
            if let Some(record) = self.records.lock().pop_front() {
                return Some(record);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.records.lock().pop_front();
            }
        }
    }
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.id)
            .field("records", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

struct ShellEntry {
    session: Arc<ShellSession>,
    subscriptions: Vec<(&'static str, SubscriptionId)>,
}

/// Shell sessions of one runtime, keyed by id
pub struct ShellRegistry {
    runtime: String,
    broker: Arc<EventBroker>,
    sessions: DashMap<String, ShellEntry>,
    channel: RwLock<Option<Arc<MessageChannel>>>,
}

impl ShellRegistry {
    pub fn new(runtime: impl Into<String>, broker: Arc<EventBroker>) -> Self {
        Self {
            runtime: runtime.into(),
            broker,
            sessions: DashMap::new(),
            channel: RwLock::new(None),
        }
    }

    /// Route input through `channel` from now on
    pub fn attach(&self, channel: Arc<MessageChannel>) {
        *self.channel.write() = Some(channel);
    }

    pub fn detach(&self) {
        self.channel.write().take();
    }

    /// Get the session for `id`, creating it if needed
    pub fn open_shell(&self, id: &str) -> Arc<ShellSession> {
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            let session = Arc::new(ShellSession::new(id));
            let subscriptions = [
                (categories::STDOUT, IoKind::Stdout),
                (categories::STDERR, IoKind::Stderr),
            ]
            .into_iter()
            .map(|(category, kind)| {
                let session = Arc::clone(&session);
                let sid = self.broker.subscribe(category, move |event: &BrokerEvent| {
                    match event.text() {
                        Some(text) => session.add(kind, text),
                        None => session.add(kind, event.payload.to_string()),
                    }
                });
                (category, sid)
            })
            .collect();

            debug!("Opened shell '{}' on '{}'", id, self.runtime);
            ShellEntry {
                session,
                subscriptions,
            }
        });
        Arc::clone(&entry.session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ShellSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(&entry.session))
    }

    /// Close a session; unknown ids are ignored
    pub fn close_shell(&self, id: &str) -> bool {
        let Some((_, entry)) = self.sessions.remove(id) else {
            return false;
        };
        for (category, sid) in entry.subscriptions {
            self.broker.unsubscribe(category, sid);
        }
        debug!("Closed shell '{}' on '{}'", id, self.runtime);
        true
    }

    /// Send `text` to the node's console and record it in the session
    pub fn write(&self, id: &str, text: &str) -> BackendResult<()> {
        let channel = self
            .channel
            .read()
            .as_ref()
            .filter(|channel| channel.is_open())
            .cloned()
            .ok_or_else(|| {
                BackendError::not_running(self.runtime.clone())
                    .with_context(format!("writing to shell '{id}'"))
            })?;

        channel.input(text)?;
        if let Some(session) = self.get(id) {
            session.add(IoKind::Stdin, text);
        }
        Ok(())
    }

    /// Ids of open sessions, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session and stop routing input
    pub fn dispose(&self) {
        for id in self.ids() {
            self.close_shell(&id);
        }
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use crate::protocol::Outcome;
    use crate::transport::{ScriptedNode, loopback};
    use serde_json::json;

    fn live_registry() -> (ShellRegistry, Arc<MessageChannel>, ScriptedNode) {
        let broker = Arc::new(EventBroker::new());
        let (wire, remote) = loopback();
        let node = remote.serve(|_, _, _| Outcome::Ok(json!("ok")));
        let channel = Arc::new(MessageChannel::start(
            "shell@localhost",
            wire,
            Arc::clone(&broker),
            &TimeoutConfig::default(),
        ));
        let registry = ShellRegistry::new("shell@localhost", broker);
        registry.attach(Arc::clone(&channel));
        (registry, channel, node)
    }

    #[tokio::test]
    async fn test_concurrent_open_yields_one_session() {
        let registry = Arc::new(ShellRegistry::new("n", Arc::new(EventBroker::new())));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.open_shell("s1") }));
        }
        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(registry.broker.listener_count(categories::STDOUT), 1);
    }

    #[tokio::test]
    async fn test_output_is_recorded_by_kind() {
        let (registry, _channel, node) = live_registry();
        let session = registry.open_shell("main");

        node.emit(categories::STDOUT, json!("1> "));
        node.emit(categories::STDERR, json!("warning"));

        let first = session.next_record(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first, IoRecord::new(IoKind::Stdout, "1> "));
        let second = session.next_record(Duration::from_secs(1)).await.unwrap();
        assert_eq!(second, IoRecord::new(IoKind::Stderr, "warning"));
        assert!(session.next_record(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_write_forwards_input_and_records_it() {
        let (registry, _channel, node) = live_registry();
        let session = registry.open_shell("main");

        registry.write("main", "self().\n").unwrap();
        assert!(node.wait_until(Duration::from_secs(1), |log| !log.is_empty()).await);
        assert_eq!(node.inputs(), vec!["self().\n"]);
        assert_eq!(session.snapshot(), vec![IoRecord::new(IoKind::Stdin, "self().\n")]);
        assert_eq!(session.drain().len(), 1);
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_write_after_close_is_not_running() {
        let (registry, channel, _node) = live_registry();
        registry.open_shell("main");
        channel.close().await;

        let err = registry.write("main", "x.\n").unwrap_err();
        assert!(matches!(err, BackendError::NotRunning { .. }));

        let detached = ShellRegistry::new("idle", Arc::new(EventBroker::new()));
        assert!(detached.write("any", "x.\n").is_err());
    }

    #[test]
    fn test_full_session_drops_oldest_records() {
        let session = ShellSession::with_capacity("bounded", 3);
        for n in 0..5 {
            session.add(IoKind::Stdout, n.to_string());
        }

        let texts: Vec<String> = session.drain().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["2", "3", "4"]);
        assert_eq!(session.dropped(), 2);

        session.add(IoKind::Stdin, "after drain");
        assert_eq!(session.len(), 1);
        assert_eq!(session.dropped(), 2);
    }

    #[test]
    fn test_close_and_dispose() {
        let broker = Arc::new(EventBroker::new());
        let registry = ShellRegistry::new("n", Arc::clone(&broker));
        let session = registry.open_shell("a");
        registry.open_shell("b");

        assert!(registry.close_shell("a"));
        assert!(!registry.close_shell("a"));
        assert!(!registry.close_shell("unknown"));

        broker.publish(categories::STDOUT, json!("after close"));
        assert!(session.is_empty());

        registry.dispose();
        assert!(registry.is_empty());
        assert_eq!(broker.listener_count(categories::STDOUT), 0);
        assert_eq!(broker.listener_count(categories::STDERR), 0);
    }
}
