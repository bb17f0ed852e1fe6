//! Error types for Beamlink
//!
//! Every fallible operation in the core returns [`BackendResult`]. All errors
//! implement [`UnifiedError`], which gives callers a stable error code, a
//! human-readable message, optional context and a retry hint.

mod constructors;
mod conversions;
mod types;
mod unified_error;

pub use types::{BackendError, BackendResult, ResultExt, UnifiedError};
