//! Beamlink Core Library
//!
//! Supervises Erlang runtime nodes and multiplexes one connection per node
//! across builders, shells, the debugger, code loading and cross-reference
//! queries.

pub mod broker;
pub mod channel;
pub mod code;
pub mod config;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod shell;
pub mod transport;
pub mod xref;

// Re-export commonly used types
pub use broker::{BrokerEvent, EventBroker, SubscriptionId, categories, lifecycle};
pub use channel::{MessageChannel, RpcFuture};
pub use code::{CodeBundle, CodeContext, CodeRegistry};
pub use config::{
    BeamlinkConfig, InitialCall, LogFormat, LoggingConfig, RuntimeConfig, TimeoutConfig,
};
pub use error::{BackendError, BackendResult, UnifiedError};
pub use protocol::{CorrelationId, Inbound, Outbound, Outcome, Term};
pub use runtime::{
    LaunchContext, LoadReport, LoopbackLauncher, ProcessLauncher, RuntimeHandle, RuntimeLauncher,
    RuntimeRegistry, RuntimeState, RuntimeSupervisor,
};
pub use shell::{IoKind, IoRecord, ShellRegistry, ShellSession};
pub use transport::{RemoteEnd, ScriptedNode, StdioTransport, Wire, loopback};
pub use xref::{FunctionRef, XrefClient};
