//! Configuration for Beamlink
//!
//! A single [`BeamlinkConfig`] file holds the runtime launch options, timeouts
//! and logging settings. Files may be JSON or TOML, chosen by extension.

mod loader;
mod logging_config;
mod runtime_config;
pub mod timeouts;

pub use loader::{BeamlinkConfig, DEFAULT_CONFIG_FILE, ENV_COOKIE, ENV_ERL, ENV_NODE_NAME};
pub use logging_config::{LogFormat, LoggingConfig};
pub use runtime_config::{InitialCall, RuntimeConfig};
pub use timeouts::TimeoutConfig;
