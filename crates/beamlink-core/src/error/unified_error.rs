//! UnifiedError implementation for BackendError

use super::types::{BackendError, UnifiedError};

impl UnifiedError for BackendError {
    fn error_code(&self) -> &str {
        match self {
            Self::Launch { .. } => "BACKEND_LAUNCH",
            Self::ConnectionClosed { .. } => "BACKEND_CONNECTION_CLOSED",
            Self::Timeout { .. } => "BACKEND_TIMEOUT",
            Self::Remote { .. } => "BACKEND_REMOTE",
            Self::AlreadyDisposed { .. } => "BACKEND_ALREADY_DISPOSED",
            Self::NotRunning { .. } => "BACKEND_NOT_RUNNING",
            Self::Transport { .. } => "BACKEND_TRANSPORT",
            Self::Protocol { .. } => "BACKEND_PROTOCOL",
            Self::Config { .. } => "BACKEND_CONFIG",
            Self::Io { .. } => "BACKEND_IO",
            Self::Cancelled => "BACKEND_CANCELLED",
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Launch { message, .. } => message,
            Self::ConnectionClosed { message, .. } => message,
            Self::Timeout { .. } => "Call timeout",
            Self::Remote { .. } => "Remote error",
            Self::AlreadyDisposed { .. } => "Runtime already disposed",
            Self::NotRunning { .. } => "Runtime not running",
            Self::Transport { message, .. } => message,
            Self::Protocol { message, .. } => message,
            Self::Config { message, .. } => message,
            Self::Io { message, .. } => message,
            Self::Cancelled => "Operation cancelled",
        }
    }

    fn context(&self) -> Option<&str> {
        match self {
            Self::Launch { context, .. } => context.as_deref(),
            Self::ConnectionClosed { context, .. } => context.as_deref(),
            Self::Timeout { context, .. } => context.as_deref(),
            Self::Remote { context, .. } => context.as_deref(),
            Self::NotRunning { context, .. } => context.as_deref(),
            Self::Transport { context, .. } => context.as_deref(),
            Self::Protocol { context, .. } => context.as_deref(),
            Self::Config { context, .. } => context.as_deref(),
            Self::Io { context, .. } => context.as_deref(),
            Self::AlreadyDisposed { .. } | Self::Cancelled => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed { .. }
                | Self::Timeout { .. }
                | Self::NotRunning { .. }
                | Self::Transport { .. }
        )
    }
}
