//! Core error types and traits for Beamlink

use serde_json::Value;
use thiserror::Error;

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Unified error trait implemented by all Beamlink errors.
///
/// - error_code(): unique code for programmatic identification
/// - message(): human-readable message
/// - context(): optional additional context
/// - is_retryable(): whether repeating the operation may succeed
pub trait UnifiedError: std::error::Error + Send + Sync {
    /// Get the error code for programmatic handling
    fn error_code(&self) -> &str;

    /// Get the human-readable error message
    fn message(&self) -> &str;

    /// Get optional context about the error
    fn context(&self) -> Option<&str> {
        None
    }

    /// Check if this error is retryable
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Attach context to the error, keeping its variant
    fn context<C: std::fmt::Display>(self, context: C) -> BackendResult<T>;

    /// Attach context lazily (only evaluated on error)
    fn with_context<C: std::fmt::Display, F: FnOnce() -> C>(self, f: F) -> BackendResult<T>;
}

impl<T> ResultExt<T> for BackendResult<T> {
    fn context<C: std::fmt::Display>(self, context: C) -> BackendResult<T> {
        self.map_err(|e| e.with_context(context.to_string()))
    }

    fn with_context<C: std::fmt::Display, F: FnOnce() -> C>(self, f: F) -> BackendResult<T> {
        self.map_err(|e| e.with_context(f().to_string()))
    }
}

/// Main error type for the backend connection manager
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// The runtime process could not be started or the handshake failed
    #[error("Launch error: {message}")]
    Launch {
        message: String,
        node: Option<String>,
        context: Option<String>,
    },

    /// The connection was closed while the operation was outstanding
    #[error("Connection closed: {message}")]
    ConnectionClosed {
        message: String,
        context: Option<String>,
    },

    /// A call did not receive its reply in time
    #[error("Call timeout after {millis} ms")]
    Timeout {
        millis: u64,
        context: Option<String>,
    },

    /// The remote side returned an explicit error term
    #[error("Remote error: {reason}")]
    Remote {
        reason: Value,
        context: Option<String>,
    },

    /// Operation issued on a disposed runtime
    #[error("Runtime '{name}' is already disposed")]
    AlreadyDisposed { name: String },

    /// Operation needing a live process issued while the runtime is down
    #[error("Runtime '{name}' is not running")]
    NotRunning {
        name: String,
        context: Option<String>,
    },

    /// Transport level failure (pipe, process I/O)
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        context: Option<String>,
    },

    /// Malformed or unexpected wire data
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        context: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: Option<String>,
    },

    /// Local filesystem errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        path: Option<String>,
        context: Option<String>,
    },

    /// The operation was cancelled by its caller
    #[error("Operation cancelled")]
    Cancelled,
}
