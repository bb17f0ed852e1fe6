//! Transport layer between the channel and a runtime node
//!
//! A [`Wire`] is split into a sending half and a receiving half so the
//! channel can run one writer task and one reader task without sharing a
//! lock across awaits.
//!
//! ## Available Transports
//!
//! - **Stdio**: spawned node process speaking line-delimited envelopes
//! - **Loopback**: in-memory pair with a scriptable remote end

pub mod memory;
pub mod stdio;

pub use memory::{RemoteEnd, ScriptedNode, loopback};
pub use stdio::StdioTransport;

use crate::error::BackendResult;
use crate::protocol::{Inbound, Outbound};
use async_trait::async_trait;

/// Sending half of a transport
#[async_trait]
pub trait WireSink: Send {
    /// Write one envelope; envelopes are delivered in call order
    async fn send(&mut self, message: &Outbound) -> BackendResult<()>;

    /// Close the sending side and release the peer
    async fn close(&mut self) -> BackendResult<()>;
}

/// Receiving half of a transport
#[async_trait]
pub trait WireSource: Send {
    /// Receive the next envelope.
    ///
    /// Returns `Ok(None)` at end of stream. A `Protocol` error means one
    /// undecodable envelope was skipped and the stream is still usable; any
    /// other error means the stream is broken.
    async fn receive(&mut self) -> BackendResult<Option<Inbound>>;
}

/// A connected transport, ready to be handed to a channel
pub struct Wire {
    pub sink: Box<dyn WireSink>,
    pub source: Box<dyn WireSource>,
}

impl Wire {
    pub fn new(sink: Box<dyn WireSink>, source: Box<dyn WireSource>) -> Self {
        Self { sink, source }
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire").finish_non_exhaustive()
    }
}
