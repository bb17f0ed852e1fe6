//! Starting or reaching a runtime node
//!
//! A launcher produces a connected [`Wire`]; everything above it is
//! transport-agnostic.

use crate::config::{RuntimeConfig, TimeoutConfig};
use crate::error::BackendResult;
use crate::transport::{RemoteEnd, ScriptedNode, StdioTransport, Wire, loopback};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// A freshly established connection
#[derive(Debug)]
pub struct Launched {
    pub wire: Wire,
    /// False when attached to a node that was already running
    pub freshly_started: bool,
}

/// Produces connections to runtime nodes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeLauncher: Send + Sync {
    /// Start (or attach to) the node called `node_name`
    async fn launch(
        &self,
        config: &RuntimeConfig,
        node_name: &str,
        timeouts: &TimeoutConfig,
    ) -> BackendResult<Launched>;
}

/// Spawns `erl`, or a hidden helper node when attaching
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Arguments for a hidden node that bridges to the already running `target`
    pub fn attach_args(config: &RuntimeConfig, target: &str) -> Vec<String> {
        let suffix = Uuid::new_v4().simple().to_string();
        let helper = format!("{}_attach_{}", config.bridge_module, &suffix[..8]);
        let mut args = vec![
            if config.uses_long_name() { "-name" } else { "-sname" }.to_string(),
            helper,
            "-hidden".to_string(),
        ];
        if let Some(cookie) = config.cookie.as_deref().filter(|c| !c.is_empty()) {
            args.push("-setcookie".to_string());
            args.push(cookie.to_string());
        }
        args.extend([
            "-noinput".to_string(),
            "-s".to_string(),
            config.bridge_module.clone(),
            "attach".to_string(),
            target.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl RuntimeLauncher for ProcessLauncher {
    async fn launch(
        &self,
        config: &RuntimeConfig,
        node_name: &str,
        timeouts: &TimeoutConfig,
    ) -> BackendResult<Launched> {
        let (args, freshly_started) = if config.attach {
            (Self::attach_args(config, node_name), false)
        } else {
            (config.node_args(node_name), true)
        };
        debug!("Starting {} {}", config.erl_path, args.join(" "));

        let wire = StdioTransport::spawn(
            &config.erl_path,
            &args,
            config.working_dir.as_deref(),
            timeouts.close_grace,
        )
        .await
        .map_err(|e| e.with_context(format!("node '{node_name}'")))?;

        if freshly_started {
            info!("Spawned node '{}'", node_name);
        } else {
            info!("Attaching to running node '{}'", node_name);
        }
        Ok(Launched {
            wire,
            freshly_started,
        })
    }
}

type NodeFactory = dyn Fn(RemoteEnd) -> ScriptedNode + Send + Sync;

/// Launcher handing out in-memory nodes answered by a factory-built handler
pub struct LoopbackLauncher {
    factory: Box<NodeFactory>,
    nodes: Mutex<Vec<Arc<ScriptedNode>>>,
    freshly_started: bool,
}

impl LoopbackLauncher {
    /// Every launch passes a new [`RemoteEnd`] to `factory`
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(RemoteEnd) -> ScriptedNode + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            nodes: Mutex::new(Vec::new()),
            freshly_started: true,
        }
    }

    /// Report launches as attaching to an existing node
    pub fn attached(mut self) -> Self {
        self.freshly_started = false;
        self
    }

    /// Nodes created so far, oldest first
    pub fn nodes(&self) -> Vec<Arc<ScriptedNode>> {
        self.nodes.lock().clone()
    }

    pub fn last_node(&self) -> Option<Arc<ScriptedNode>> {
        self.nodes.lock().last().cloned()
    }
}

#[async_trait]
impl RuntimeLauncher for LoopbackLauncher {
    async fn launch(
        &self,
        _config: &RuntimeConfig,
        node_name: &str,
        _timeouts: &TimeoutConfig,
    ) -> BackendResult<Launched> {
        let (wire, remote) = loopback();
        let node = (self.factory)(remote);
        self.nodes.lock().push(Arc::new(node));
        debug!("Started loopback node '{}'", node_name);
        Ok(Launched {
            wire,
            freshly_started: self.freshly_started,
        })
    }
}

impl std::fmt::Debug for LoopbackLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackLauncher")
            .field("nodes", &self.nodes.lock().len())
            .field("freshly_started", &self.freshly_started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Outcome;
    use serde_json::json;

    #[test]
    fn test_attach_args() {
        let config = RuntimeConfig::named("app@localhost").with_cookie("c");
        let args = ProcessLauncher::attach_args(&config, "app@localhost");

        assert_eq!(args[0], "-sname");
        assert!(args[1].starts_with("beamlink_bridge_attach_"));
        assert!(args.contains(&"-hidden".to_string()));
        assert_eq!(args[args.len() - 2..], ["attach", "app@localhost"]);
    }

    #[tokio::test]
    async fn test_loopback_launcher_tracks_nodes() {
        let launcher =
            LoopbackLauncher::new(|remote| remote.serve(|_, _, _| Outcome::Ok(json!("ok"))))
                .attached();
        let config = RuntimeConfig::default();
        let timeouts = TimeoutConfig::default();

        let first = launcher.launch(&config, "a", &timeouts).await.unwrap();
        assert!(!first.freshly_started);
        launcher.launch(&config, "b", &timeouts).await.unwrap();
        assert_eq!(launcher.nodes().len(), 2);
        assert!(launcher.last_node().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_launcher_missing_executable() {
        let mut config = RuntimeConfig::named("ghost");
        config.erl_path = "/nonexistent/erl".into();
        let err = ProcessLauncher::new()
            .launch(&config, "ghost", &TimeoutConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::BackendError::Launch { .. }));
    }
}
