//! Pending-call table shared by callers and the reader task
//!
//! Every mutation happens under the channel's lock, and a resolution is sent
//! through the oneshot while that lock is held. A caller that finds its entry
//! already gone therefore knows the value is sitting in its receiver.

use crate::error::{BackendError, BackendResult};
use crate::protocol::{CorrelationId, Term};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

pub(crate) type ReplySlot = oneshot::Sender<BackendResult<Term>>;

pub(crate) struct PendingCall {
    slot: ReplySlot,
    target: String,
    created_at: Instant,
}

impl PendingCall {
    pub(crate) fn new(slot: ReplySlot, target: String) -> Self {
        Self {
            slot,
            target,
            created_at: Instant::now(),
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: HashMap<CorrelationId, PendingCall>,
    closed: bool,
}

impl PendingCalls {
    /// Register a call; fails once the table has been closed
    pub(crate) fn insert(&mut self, id: CorrelationId, call: PendingCall) -> BackendResult<()> {
        if self.closed {
            return Err(BackendError::connection_closed("channel is closed"));
        }
        self.calls.insert(id, call);
        Ok(())
    }

    /// Deliver a result; returns the call's target and age, or None if nobody waits
    pub(crate) fn resolve(
        &mut self,
        id: CorrelationId,
        result: BackendResult<Term>,
    ) -> Option<(String, Duration)> {
        let call = self.calls.remove(&id)?;
        let age = call.created_at.elapsed();
        // A dropped receiver means the waiter went away in the meantime
        let _ = call.slot.send(result);
        Some((call.target, age))
    }

    /// Forget a call without resolving it; returns whether it was still pending
    pub(crate) fn remove(&mut self, id: CorrelationId) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Fail every pending call and refuse new ones; returns how many were failed
    pub(crate) fn close_all(&mut self, reason: &str) -> usize {
        self.closed = true;
        let count = self.calls.len();
        for (_, call) in self.calls.drain() {
            let _ = call
                .slot
                .send(Err(BackendError::connection_closed(reason.to_string())));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}
