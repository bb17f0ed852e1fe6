//! Centralized timeout configuration
//!
//! Default values live in constants; every value can be overridden through
//! the `timeouts` section of the config file using humantime strings
//! such as `"45s"` or `"500ms"`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout values for the runtime lifecycle
pub mod runtime {
    use super::*;

    /// Time allowed for spawning the node and completing the handshake (30 seconds)
    pub const LAUNCH_SECS: u64 = 30;

    /// Grace period for the node to exit after its input is closed (5 seconds)
    pub const CLOSE_GRACE_SECS: u64 = 5;

    /// Get launch timeout as Duration
    pub fn launch_timeout() -> Duration {
        Duration::from_secs(LAUNCH_SECS)
    }

    /// Get close grace period as Duration
    pub fn close_grace() -> Duration {
        Duration::from_secs(CLOSE_GRACE_SECS)
    }
}

/// Default timeout values for RPC traffic
pub mod rpc {
    use super::*;

    /// Default timeout for a synchronous call (10 seconds)
    pub const CALL_SECS: u64 = 10;

    /// Timeout for short probes issued during launch and path handling (5 seconds)
    pub const PROBE_SECS: u64 = 5;

    /// Get call timeout as Duration
    pub fn call_timeout() -> Duration {
        Duration::from_secs(CALL_SECS)
    }

    /// Get probe timeout as Duration
    pub fn probe_timeout() -> Duration {
        Duration::from_secs(PROBE_SECS)
    }
}

/// Timeout overrides loaded from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Spawn plus handshake
    #[serde(default = "runtime::launch_timeout", with = "humantime_serde")]
    pub launch: Duration,
    /// Default for calls that do not pass their own timeout
    #[serde(default = "rpc::call_timeout", with = "humantime_serde")]
    pub call: Duration,
    /// Probes issued by the supervisor itself
    #[serde(default = "rpc::probe_timeout", with = "humantime_serde")]
    pub probe: Duration,
    /// Wait for the node process to exit before killing it
    #[serde(default = "runtime::close_grace", with = "humantime_serde")]
    pub close_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            launch: runtime::launch_timeout(),
            call: rpc::call_timeout(),
            probe: rpc::probe_timeout(),
            close_grace: runtime::close_grace(),
        }
    }
}

impl TimeoutConfig {
    /// Names of timeouts that are zero, which would make every operation fail
    pub fn zero_fields(&self) -> Vec<&'static str> {
        let mut zero = Vec::new();
        if self.launch.is_zero() {
            zero.push("launch");
        }
        if self.call.is_zero() {
            zero.push("call");
        }
        if self.probe.is_zero() {
            zero.push("probe");
        }
        zero
    }
}
