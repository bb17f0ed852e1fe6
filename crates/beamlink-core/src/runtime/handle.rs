//! Identity and liveness of one runtime process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Why a runtime was started; decides what happens after launch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchContext {
    /// A plain node driven by shells and tooling
    #[default]
    Interactive,
    /// A node running the project's initial call under supervision
    Managed,
    /// A node with the debugger attached
    Debug,
}

impl std::fmt::Display for LaunchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Managed => write!(f, "managed"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

impl std::str::FromStr for LaunchContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "managed" => Ok(Self::Managed),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown launch context '{other}'")),
        }
    }
}

/// One external runtime process.
///
/// Clones share the liveness flag. Once dead a handle stays dead; a restart
/// produces a new handle.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    name: String,
    version: Option<String>,
    node_id: Uuid,
    context: LaunchContext,
    alive: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
}

impl RuntimeHandle {
    pub fn new(name: impl Into<String>, context: LaunchContext) -> Self {
        Self {
            name: name.into(),
            version: None,
            node_id: Uuid::new_v4(),
            context,
            alive: Arc::new(AtomicBool::new(true)),
            started_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OTP release reported by the node during the handshake
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn context(&self) -> LaunchContext {
        self.context
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark the process dead; returns true if it was alive until now
    pub fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_is_shared_and_one_way() {
        let handle = RuntimeHandle::new("ide@localhost", LaunchContext::Debug).with_version("26");
        let clone = handle.clone();
        assert!(clone.is_alive());

        assert!(handle.mark_dead());
        assert!(!clone.is_alive());
        assert!(!clone.mark_dead());
        assert_eq!(clone.node_id(), handle.node_id());
        assert_eq!(clone.version(), Some("26"));
    }

    #[test]
    fn test_handles_get_unique_ids() {
        let a = RuntimeHandle::new("n", LaunchContext::Interactive);
        let b = RuntimeHandle::new("n", LaunchContext::Interactive);
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn test_launch_context_parse() {
        assert_eq!("Managed".parse::<LaunchContext>().unwrap(), LaunchContext::Managed);
        assert_eq!(LaunchContext::Debug.to_string(), "debug");
        assert!("remote".parse::<LaunchContext>().is_err());
    }
}
