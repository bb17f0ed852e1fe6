//! Shared fixtures: a scripted node and supervisors wired to it

#![allow(dead_code)]

use beamlink_core::{
    Inbound, LoopbackLauncher, Outbound, Outcome, RuntimeConfig, RuntimeSupervisor, ScriptedNode,
    Term, TimeoutConfig, categories,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(2);

/// How the fake node answers the supervisor's probes
#[derive(Debug, Clone, Copy)]
pub struct NodeScript {
    pub dirs_accessible: bool,
    pub debugger_running: bool,
    /// `beamlink_debug:is_running` answers with an error term
    pub debug_probe_fails: bool,
    /// A `debug` event follows the `beamlink_debug:attach` cast immediately
    pub eager_debug_event: bool,
}

impl Default for NodeScript {
    fn default() -> Self {
        Self {
            dirs_accessible: true,
            debugger_running: false,
            debug_probe_fails: false,
            eager_debug_event: false,
        }
    }
}

pub fn answer(script: NodeScript, module: &str, function: &str, args: &[Term]) -> Outcome {
    match (module, function) {
        ("erlang", "system_info") => Outcome::Ok(json!("26")),
        ("erlang", "node") => Outcome::Ok(json!("fake@localhost")),
        ("filelib", "is_dir") => Outcome::Ok(json!(script.dirs_accessible)),
        ("beamlink_debug", "is_running") if script.debug_probe_fails => {
            Outcome::Error(json!("undef"))
        }
        ("beamlink_debug", "is_running") => Outcome::Ok(json!(script.debugger_running)),
        ("code", "load_binary") => Outcome::Ok(json!(["module", args[0].clone()])),
        _ => Outcome::Ok(json!("ok")),
    }
}

/// Events the fake node sends on its own when a cast arrives
pub fn react(script: NodeScript, module: &str, function: &str) -> Vec<Inbound> {
    match (module, function) {
        ("beamlink_debug", "attach") if script.eager_debug_event => {
            vec![Inbound::event(categories::DEBUG, json!({"armed": true}))]
        }
        _ => Vec::new(),
    }
}

pub fn launcher(script: NodeScript) -> Arc<LoopbackLauncher> {
    Arc::new(LoopbackLauncher::new(move |remote| {
        remote.serve_with_casts(
            move |module, function, args| answer(script, module, function, args),
            move |module, function, _| react(script, module, function),
        )
    }))
}

pub fn supervisor(config: RuntimeConfig, launcher: &Arc<LoopbackLauncher>) -> RuntimeSupervisor {
    let timeouts = TimeoutConfig {
        launch: Duration::from_secs(2),
        call: Duration::from_secs(2),
        probe: Duration::from_secs(1),
        close_grace: Duration::from_millis(200),
    };
    RuntimeSupervisor::new(config, timeouts, launcher.clone())
}

/// Round-trip a call so every cast issued before it has reached the node
pub async fn flush(supervisor: &RuntimeSupervisor) {
    let channel = supervisor.channel().expect("runtime has a channel");
    channel
        .call("erlang", "node", vec![], WAIT)
        .await
        .expect("flush call");
}

/// Argument lists of every invocation of `module:function`, in arrival order
pub fn invocations(node: &ScriptedNode, module: &str, function: &str) -> Vec<Vec<Term>> {
    node.invocations(module, function)
        .iter()
        .filter_map(Outbound::mfa)
        .map(|(_, _, args)| args.to_vec())
        .collect()
}

/// `module:function` of every cast, in arrival order
pub fn casts(node: &ScriptedNode) -> Vec<String> {
    node.received()
        .iter()
        .filter_map(|m| match m {
            Outbound::Cast {
                module, function, ..
            } => Some(format!("{module}:{function}")),
            _ => None,
        })
        .collect()
}

/// Write a minimal file carrying the BEAM container header
pub fn write_beam(dir: &Path, module: &str) {
    let mut bytes = b"FOR1".to_vec();
    bytes.extend_from_slice(&12u32.to_be_bytes());
    bytes.extend_from_slice(b"BEAM");
    bytes.extend_from_slice(b"Atom\0\0\0\0");
    std::fs::write(dir.join(format!("{module}.beam")), bytes).expect("write beam");
}
