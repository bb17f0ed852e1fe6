//! Runtime supervision
//!
//! - [`RuntimeSupervisor`]: lifecycle of one node
//! - [`RuntimeRegistry`]: the active supervisors, by name
//! - [`RuntimeLauncher`]: how a node is started or reached

mod handle;
mod launcher;
mod registry;
mod supervisor;

pub use handle::{LaunchContext, RuntimeHandle};
pub use launcher::{Launched, LoopbackLauncher, ProcessLauncher, RuntimeLauncher};
pub use registry::RuntimeRegistry;
pub use supervisor::{LoadReport, RuntimeState, RuntimeSupervisor};
