//! Handle for a call issued without waiting

use super::ChannelShared;
use crate::error::{BackendError, BackendResult};
use crate::protocol::{CorrelationId, Term};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Result of [`MessageChannel::async_call`](super::MessageChannel::async_call).
///
/// Await it, poll it with [`try_result`](Self::try_result), or bound it with
/// [`wait`](Self::wait). Dropping it cancels the call: the pending entry is
/// removed and a later reply is discarded.
pub struct RpcFuture {
    id: CorrelationId,
    receiver: oneshot::Receiver<BackendResult<Term>>,
    shared: Arc<ChannelShared>,
    done: bool,
}

impl RpcFuture {
    pub(super) fn new(
        id: CorrelationId,
        receiver: oneshot::Receiver<BackendResult<Term>>,
        shared: Arc<ChannelShared>,
    ) -> Self {
        Self {
            id,
            receiver,
            shared,
            done: false,
        }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Take the result if it has arrived
    pub fn try_result(&mut self) -> Option<BackendResult<Term>> {
        if self.done {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.done = true;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                self.done = true;
                Some(Err(BackendError::connection_closed("reply slot dropped")))
            }
        }
    }

    /// Wait at most `timeout` for the result
    pub async fn wait(mut self, timeout: Duration) -> BackendResult<Term> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(result) => {
                self.done = true;
                result.unwrap_or_else(|_| {
                    Err(BackendError::connection_closed("reply slot dropped"))
                })
            }
            Err(_) => {
                self.done = true;
                // Whoever removes the entry owns the resolution
                if self.shared.pending.lock().remove(self.id) {
                    return Err(BackendError::timeout(timeout));
                }
                match self.receiver.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::timeout(timeout)),
                }
            }
        }
    }

    /// Give up on the call; a later reply is discarded
    pub fn cancel(self) {}
}

impl Future for RpcFuture {
    type Output = BackendResult<Term>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.done {
            return Poll::Ready(Err(BackendError::Cancelled));
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(result) => {
                self.done = true;
                Poll::Ready(result.unwrap_or_else(|_| {
                    Err(BackendError::connection_closed("reply slot dropped"))
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RpcFuture {
    fn drop(&mut self) {
        if !self.done {
            self.shared.pending.lock().remove(self.id);
        }
    }
}

impl std::fmt::Debug for RpcFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcFuture")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}
