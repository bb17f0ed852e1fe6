//! In-memory loopback transport
//!
//! [`loopback`] returns a [`Wire`] for the channel plus the [`RemoteEnd`]
//! playing the node. Envelopes still go through the line codec, so the
//! remote end sees exactly what a real bridge would read.

use super::{Wire, WireSink, WireSource};
use crate::error::{BackendError, BackendResult};
use crate::protocol::{
    CorrelationId, Inbound, Outbound, Outcome, Term, decode_inbound, decode_outbound,
    encode_inbound, encode_outbound,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

/// Create a connected loopback pair
pub fn loopback() -> (Wire, RemoteEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let wire = Wire::new(
        Box::new(LoopbackSink { tx: Some(out_tx) }),
        Box::new(LoopbackSource { rx: in_rx }),
    );
    let remote = RemoteEnd {
        to_local: Some(in_tx),
        from_local: out_rx,
    };
    (wire, remote)
}

struct LoopbackSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl WireSink for LoopbackSink {
    async fn send(&mut self, message: &Outbound) -> BackendResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| BackendError::connection_closed("loopback sink closed"))?;
        let line = encode_outbound(message)?;
        tx.send(line)
            .map_err(|_| BackendError::transport("loopback peer is gone"))
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.tx.take();
        Ok(())
    }
}

struct LoopbackSource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl WireSource for LoopbackSource {
    async fn receive(&mut self) -> BackendResult<Option<Inbound>> {
        match self.rx.recv().await {
            Some(line) => decode_inbound(&line).map(Some),
            None => Ok(None),
        }
    }
}

/// The node's side of a loopback pair
pub struct RemoteEnd {
    to_local: Option<mpsc::UnboundedSender<String>>,
    from_local: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    /// Next envelope written by the local side; `None` once it closed
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        loop {
            let line = self.from_local.recv().await?;
            match decode_outbound(&line) {
                Ok(message) => return Some(message),
                Err(e) => warn!("Loopback remote dropped outbound line: {}", e),
            }
        }
    }

    /// Reply to a call with a success value
    pub fn reply(&self, id: CorrelationId, value: Term) -> bool {
        self.send(&Inbound::ok(id, value))
    }

    /// Reply to a call with an error term
    pub fn reply_error(&self, id: CorrelationId, reason: Term) -> bool {
        self.send(&Inbound::error(id, reason))
    }

    /// Emit an out-of-band event
    pub fn emit(&self, category: &str, payload: Term) -> bool {
        self.send(&Inbound::event(category, payload))
    }

    /// Push a raw line, which need not be a valid envelope
    pub fn send_raw(&self, line: impl Into<String>) -> bool {
        self.to_local
            .as_ref()
            .is_some_and(|tx| tx.send(line.into()).is_ok())
    }

    /// Close the node's output; the local reader sees end of stream
    pub fn hang_up(&mut self) {
        self.to_local.take();
    }

    fn send(&self, message: &Inbound) -> bool {
        match encode_inbound(message) {
            Ok(line) => self.send_raw(line),
            Err(_) => false,
        }
    }

    /// Answer calls with `handler` on a background task and record everything received
    pub fn serve<F>(self, handler: F) -> ScriptedNode
    where
        F: FnMut(&str, &str, &[Term]) -> Outcome + Send + 'static,
    {
        ScriptedNode::start(self, handler, |_, _, _| Vec::new())
    }

    /// Like [`serve`](Self::serve), and also send whatever `on_cast` returns
    /// as soon as each cast arrives
    pub fn serve_with_casts<F, C>(self, handler: F, on_cast: C) -> ScriptedNode
    where
        F: FnMut(&str, &str, &[Term]) -> Outcome + Send + 'static,
        C: FnMut(&str, &str, &[Term]) -> Vec<Inbound> + Send + 'static,
    {
        ScriptedNode::start(self, handler, on_cast)
    }
}

/// A loopback node that answers calls through a handler
pub struct ScriptedNode {
    received: Arc<Mutex<Vec<Outbound>>>,
    arrived: Arc<Notify>,
    events: Mutex<Option<mpsc::UnboundedSender<String>>>,
    task: JoinHandle<()>,
}

impl ScriptedNode {
    fn start<F, C>(mut remote: RemoteEnd, mut handler: F, mut on_cast: C) -> Self
    where
        F: FnMut(&str, &str, &[Term]) -> Outcome + Send + 'static,
        C: FnMut(&str, &str, &[Term]) -> Vec<Inbound> + Send + 'static,
    {
        let received = Arc::new(Mutex::new(Vec::new()));
        let arrived = Arc::new(Notify::new());
        let events = remote.to_local.clone();

        let log = Arc::clone(&received);
        let notify = Arc::clone(&arrived);
        let task = tokio::spawn(async move {
            while let Some(message) = remote.next_outbound().await {
                log.lock().push(message.clone());
                notify.notify_waiters();

                match message {
                    Outbound::Call {
                        id,
                        module,
                        function,
                        args,
                    } => {
                        let outcome = handler(&module, &function, &args);
                        remote.send(&Inbound::Reply { id, outcome });
                    }
                    Outbound::Cast {
                        module,
                        function,
                        args,
                    } => {
                        for reaction in on_cast(&module, &function, &args) {
                            remote.send(&reaction);
                        }
                    }
                    Outbound::Input { .. } => {}
                }
            }
        });

        Self {
            received,
            arrived,
            events: Mutex::new(events),
            task,
        }
    }

    /// Everything received so far, in arrival order
    pub fn received(&self) -> Vec<Outbound> {
        self.received.lock().clone()
    }

    /// Calls and casts addressed to `module:function`, in arrival order
    pub fn invocations(&self, module: &str, function: &str) -> Vec<Outbound> {
        self.received
            .lock()
            .iter()
            .filter(|m| m.mfa().is_some_and(|(m, f, _)| m == module && f == function))
            .cloned()
            .collect()
    }

    /// Console input received, in arrival order
    pub fn inputs(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|m| match m {
                Outbound::Input { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Emit an out-of-band event
    pub fn emit(&self, category: &str, payload: Term) -> bool {
        let Ok(line) = encode_inbound(&Inbound::event(category, payload)) else {
            return false;
        };
        self.events
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(line).is_ok())
    }

    /// Wait until `predicate` holds over the received log, or `timeout` passes
    pub async fn wait_until<P>(&self, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&[Outbound]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrived.notified();
            if predicate(&self.received.lock()[..]) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(&self.received.lock()[..]);
            }
        }
    }

    /// Simulate the node dying: stop answering and close its output
    pub fn hang_up(&self) {
        self.task.abort();
        self.events.lock().take();
    }
}

impl Drop for ScriptedNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_loopback_roundtrip() {
        let (Wire { mut sink, mut source }, mut remote) = loopback();

        sink.send(&Outbound::Cast {
            module: "m".into(),
            function: "f".into(),
            args: vec![json!(1)],
        })
        .await
        .unwrap();
        let seen = remote.next_outbound().await.unwrap();
        assert_eq!(seen.mfa(), Some(("m", "f", &[json!(1)][..])));

        assert!(remote.emit("build", json!("done")));
        assert_eq!(
            source.receive().await.unwrap(),
            Some(Inbound::event("build", json!("done")))
        );

        remote.hang_up();
        assert_eq!(source.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_raw_garbage_is_protocol_error() {
        let (Wire { mut source, .. }, remote) = loopback();
        remote.send_raw("{\"type\":");
        let err = source.receive().await.unwrap_err();
        assert!(matches!(err, BackendError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_send() {
        let (Wire { mut sink, .. }, mut remote) = loopback();
        sink.close().await.unwrap();
        assert!(remote.next_outbound().await.is_none());

        let err = sink
            .send(&Outbound::Input { text: "x".into() })
            .await
            .unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_scripted_node_answers_calls() {
        let (Wire { mut sink, mut source }, remote) = loopback();
        let node = remote.serve(|_, function, _| Outcome::Ok(json!(function)));

        sink.send(&Outbound::Call {
            id: CorrelationId(1),
            module: "m".into(),
            function: "hello".into(),
            args: vec![],
        })
        .await
        .unwrap();

        assert_eq!(
            source.receive().await.unwrap(),
            Some(Inbound::ok(CorrelationId(1), json!("hello")))
        );
        assert!(node.wait_until(Duration::from_secs(1), |log| log.len() == 1).await);
        assert_eq!(node.invocations("m", "hello").len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_node_reacts_to_casts() {
        let (Wire { mut sink, mut source }, remote) = loopback();
        let _node = remote.serve_with_casts(
            |_, _, _| Outcome::Ok(json!("ok")),
            |module, _, args| vec![Inbound::event(module, json!(args))],
        );

        sink.send(&Outbound::Cast {
            module: "build".into(),
            function: "go".into(),
            args: vec![json!(7)],
        })
        .await
        .unwrap();

        assert_eq!(
            source.receive().await.unwrap(),
            Some(Inbound::event("build", json!([7])))
        );
    }
}
