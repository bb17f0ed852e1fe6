//! Convenience constructors for BackendError

use super::types::BackendError;
use serde_json::Value;
use std::time::Duration;

impl BackendError {
    /// Create a new Launch error
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
            node: None,
            context: None,
        }
    }

    /// Create a Launch error naming the node that failed
    pub fn launch_node(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
            node: Some(node.into()),
            context: None,
        }
    }

    /// Create a new ConnectionClosed error
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Timeout error
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            millis: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            context: None,
        }
    }

    /// Create a new Remote error carrying the remote term verbatim
    pub fn remote(reason: Value) -> Self {
        Self::Remote {
            reason,
            context: None,
        }
    }

    /// Create a new AlreadyDisposed error
    pub fn already_disposed(name: impl Into<String>) -> Self {
        Self::AlreadyDisposed { name: name.into() }
    }

    /// Create a new NotRunning error
    pub fn not_running(name: impl Into<String>) -> Self {
        Self::NotRunning {
            name: name.into(),
            context: None,
        }
    }

    /// Create a new Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Io error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            path: None,
            context: None,
        }
    }

    /// Create an Io error for a specific path
    pub fn io_at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            path: Some(path.into()),
            context: None,
        }
    }

    /// Add context to any error that carries it
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = Some(context.into());
        match &mut self {
            Self::Launch { context: c, .. } => *c = ctx,
            Self::ConnectionClosed { context: c, .. } => *c = ctx,
            Self::Timeout { context: c, .. } => *c = ctx,
            Self::Remote { context: c, .. } => *c = ctx,
            Self::NotRunning { context: c, .. } => *c = ctx,
            Self::Transport { context: c, .. } => *c = ctx,
            Self::Protocol { context: c, .. } => *c = ctx,
            Self::Config { context: c, .. } => *c = ctx,
            Self::Io { context: c, .. } => *c = ctx,
            Self::AlreadyDisposed { .. } | Self::Cancelled => {}
        }
        self
    }

    /// Check whether this is a ConnectionClosed error
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }

    /// Check whether this is a Timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
