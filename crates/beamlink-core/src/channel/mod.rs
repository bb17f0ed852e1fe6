//! Message channel to one runtime node
//!
//! Multiplexes a single [`Wire`] across any number of concurrent callers.
//!
//! # Features
//! - Synchronous calls matched to replies by correlation id
//! - Fire-and-forget casts that never suspend the issuer
//! - Future-based calls that can be polled, bounded or cancelled
//! - Out-of-band events routed to the [`EventBroker`]
//! - One writer task preserving send order, one reader task dispatching replies

mod future;
mod pending;
mod receiver;


pub use future::RpcFuture;

use crate::broker::{EventBroker, categories, lifecycle};
use crate::config::TimeoutConfig;
use crate::error::{BackendError, BackendResult};
use crate::protocol::{CorrelationId, Outbound, Term};
use crate::transport::Wire;
use parking_lot::Mutex;
use pending::{PendingCall, PendingCalls};
use receiver::WriterCommand;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Extra time granted to the writer beyond the transport's own close grace
const CLOSE_SLACK: Duration = Duration::from_secs(1);

/// State shared between the channel, its tasks and outstanding futures
pub(crate) struct ChannelShared {
    name: String,
    pending: Mutex<PendingCalls>,
    broker: Arc<EventBroker>,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl ChannelShared {
    /// Mark the channel closing and fail pending calls; true only for the first caller
    fn begin_close(&self, reason: &str) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            return false;
        }
        let failed = self.pending.lock().close_all(reason);
        if failed > 0 {
            warn!("Failed {} pending call(s) on '{}': {}", failed, self.name, reason);
        }
        true
    }

    /// Report an unexpected loss exactly once
    fn connection_lost(&self, reason: &str) {
        if !self.begin_close(reason) {
            return;
        }
        error!("Connection to '{}' lost: {}", self.name, reason);
        self.broker.publish(
            categories::LIFECYCLE,
            json!({
                "event": lifecycle::CONNECTION_LOST,
                "runtime": self.name,
                "reason": reason,
            }),
        );
        self.closed.cancel();
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Connection to one runtime node
pub struct MessageChannel {
    shared: Arc<ChannelShared>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    next_id: AtomicU64,
    default_timeout: Duration,
    close_grace: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageChannel {
    /// Start the reader and writer tasks over `wire`
    pub fn start(
        name: impl Into<String>,
        wire: Wire,
        broker: Arc<EventBroker>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        let shared = Arc::new(ChannelShared {
            name: name.into(),
            pending: Mutex::new(PendingCalls::default()),
            broker,
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let Wire { sink, source } = wire;

        let writer = tokio::spawn(receiver::message_writer(
            sink,
            writer_rx,
            Arc::clone(&shared),
        ));
        let reader = tokio::spawn(receiver::message_receiver(source, Arc::clone(&shared)));
        debug!("Started channel to '{}'", shared.name);

        Self {
            shared,
            writer_tx,
            next_id: AtomicU64::new(1),
            default_timeout: timeouts.call,
            close_grace: timeouts.close_grace,
            tasks: Mutex::new(vec![writer, reader]),
        }
    }

    /// Name of the node this channel talks to
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.shared.broker
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Whether the channel still accepts traffic
    pub fn is_open(&self) -> bool {
        !self.shared.is_closing()
    }

    /// Number of calls still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Token cancelled once the channel has closed for any reason
    pub fn closed_token(&self) -> CancellationToken {
        self.shared.closed.clone()
    }

    /// Call `module:function(args)` and wait at most `timeout` for the reply
    #[instrument(skip(self, args), fields(node = %self.shared.name), level = "debug")]
    pub async fn call(
        &self,
        module: &str,
        function: &str,
        args: Vec<Term>,
        timeout: Duration,
    ) -> BackendResult<Term> {
        self.async_call(module, function, args)?.wait(timeout).await
    }

    /// Call with the configured default timeout
    pub async fn call_default(
        &self,
        module: &str,
        function: &str,
        args: Vec<Term>,
    ) -> BackendResult<Term> {
        self.call(module, function, args, self.default_timeout).await
    }

    /// Issue a call without waiting for its reply
    pub fn async_call(
        &self,
        module: &str,
        function: &str,
        args: Vec<Term>,
    ) -> BackendResult<RpcFuture> {
        let id = CorrelationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (slot, receiver) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(id, PendingCall::new(slot, format!("{module}:{function}")))?;

        // Dropping the future on a failed enqueue removes the entry again
        let future = RpcFuture::new(id, receiver, Arc::clone(&self.shared));
        self.enqueue(Outbound::Call {
            id,
            module: module.to_string(),
            function: function.to_string(),
            args,
        })?;
        debug!("Sent call {} {}:{}", id, module, function);
        Ok(future)
    }

    /// Send a one-way invocation
    pub fn cast(&self, module: &str, function: &str, args: Vec<Term>) -> BackendResult<()> {
        self.enqueue(Outbound::Cast {
            module: module.to_string(),
            function: function.to_string(),
            args,
        })?;
        debug!("Sent cast {}:{}", module, function);
        Ok(())
    }

    /// Forward console input to the node
    pub fn input(&self, text: impl Into<String>) -> BackendResult<()> {
        self.enqueue(Outbound::Input { text: text.into() })
    }

    fn enqueue(&self, message: Outbound) -> BackendResult<()> {
        if self.shared.is_closing() {
            return Err(BackendError::connection_closed(format!(
                "channel to '{}' is closed",
                self.shared.name
            )));
        }
        self.writer_tx
            .send(WriterCommand::Send(message))
            .map_err(|_| {
                BackendError::connection_closed(format!(
                    "writer for '{}' has stopped",
                    self.shared.name
                ))
            })
    }

    /// Close the channel; pending calls fail with `ConnectionClosed`
    pub async fn close(&self) {
        if !self.shared.begin_close("channel closed") {
            return;
        }
        info!("Closing channel to '{}'", self.shared.name);

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.writer_tx.send(WriterCommand::Shutdown(ack_tx)).is_ok()
            && tokio::time::timeout(self.close_grace + CLOSE_SLACK, ack_rx)
                .await
                .is_err()
        {
            warn!("Transport of '{}' did not close in time", self.shared.name);
        }
        self.shared.closed.cancel();

        for task in self.tasks.lock().drain(..) {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.shared.begin_close("channel dropped");
        self.shared.closed.cancel();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("name", &self.shared.name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
