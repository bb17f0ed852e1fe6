//! Background tasks driving one channel

use super::ChannelShared;
use crate::error::BackendError;
use crate::protocol::{Inbound, Outbound};
use crate::transport::{WireSink, WireSource};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Commands consumed by the writer task
pub(super) enum WriterCommand {
    /// Write one envelope
    Send(Outbound),
    /// Flush what was queued before, close the sink, then acknowledge
    Shutdown(oneshot::Sender<()>),
}

/// Single reader: decodes envelopes one at a time and routes them
pub(super) async fn message_receiver(mut source: Box<dyn WireSource>, shared: Arc<ChannelShared>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => {
                debug!("Receiver for '{}' shutting down", shared.name);
                break;
            }
            result = source.receive() => result,
        };

        match next {
            Ok(Some(Inbound::Reply { id, outcome })) => {
                let resolved = shared.pending.lock().resolve(id, outcome.into_result());
                match resolved {
                    Some((target, age)) => {
                        debug!("Resolved {} ({}) after {:?}", id, target, age);
                    }
                    None => debug!("Discarding reply {} with no waiting caller", id),
                }
            }
            Ok(Some(Inbound::Event { category, payload })) => {
                let delivered = shared.broker.publish(&category, payload);
                debug!("Event '{}' delivered to {} listener(s)", category, delivered);
            }
            Ok(None) => {
                shared.connection_lost("node closed the connection");
                break;
            }
            Err(BackendError::Protocol { message, .. }) => {
                warn!("Dropping malformed envelope from '{}': {}", shared.name, message);
            }
            Err(e) => {
                shared.connection_lost(&e.to_string());
                break;
            }
        }
    }
}

/// Single writer: preserves the order envelopes were enqueued in
pub(super) async fn message_writer(
    mut sink: Box<dyn WireSink>,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    shared: Arc<ChannelShared>,
) {
    loop {
        let command = tokio::select! {
            biased;
            command = commands.recv() => command,
            _ = shared.closed.cancelled() => None,
        };

        match command {
            Some(WriterCommand::Send(message)) => {
                if let Err(e) = sink.send(&message).await {
                    shared.connection_lost(&format!("write failed: {e}"));
                    break;
                }
            }
            Some(WriterCommand::Shutdown(ack)) => {
                if let Err(e) = sink.close().await {
                    warn!("Error closing transport of '{}': {}", shared.name, e);
                }
                let _ = ack.send(());
                return;
            }
            None => break,
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Error closing transport of '{}': {}", shared.name, e);
    }
}
