//! Runtime launch configuration

use crate::code::CodeContext;
use crate::runtime::LaunchContext;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_node_name() -> String {
    "beamlink".to_string()
}

fn default_erl() -> String {
    "erl".to_string()
}

fn default_bridge_module() -> String {
    "beamlink_bridge".to_string()
}

fn default_warn_limit() -> u32 {
    30
}

fn default_kill_limit() -> u32 {
    1024
}

/// Function fired once the runtime is up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialCall {
    pub module: String,
    pub function: String,
    /// Passed as a single string argument when non-empty
    #[serde(default)]
    pub args: String,
}

impl InitialCall {
    pub fn new(
        module: impl Into<String>,
        function: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            args: args.into(),
        }
    }

    /// Calls with an empty module or function are skipped
    pub fn is_runnable(&self) -> bool {
        !self.module.is_empty() && !self.function.is_empty()
    }

    /// Parse `module:function[:args]`
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.splitn(3, ':');
        let module = parts.next()?.trim();
        let function = parts.next()?.trim();
        let args = parts.next().unwrap_or("");
        Some(Self::new(module, function, args))
    }
}

/// Options for spawning or attaching to one runtime node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Node name, short (`ide`) or long (`ide@host.example.com`)
    #[serde(default = "default_node_name")]
    pub node_name: String,
    /// Shared secret for the distribution protocol
    #[serde(default)]
    pub cookie: Option<String>,
    /// Executable used to start the node
    #[serde(default = "default_erl")]
    pub erl_path: String,
    /// Extra command-line arguments for the node
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Working directory of the node process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Append a unique suffix to the node name
    #[serde(default)]
    pub unique_name: bool,
    /// Attach to an already running node instead of spawning one
    #[serde(default)]
    pub attach: bool,
    #[serde(default)]
    pub launch_context: LaunchContext,
    #[serde(default)]
    pub code_context: CodeContext,
    /// Project output directories registered after launch
    #[serde(default)]
    pub project_paths: Vec<PathBuf>,
    #[serde(default)]
    pub initial_call: Option<InitialCall>,
    /// Module started on the node to speak the envelope protocol
    #[serde(default = "default_bridge_module")]
    pub bridge_module: String,
    /// Process heap size that triggers a warning, in MB
    #[serde(default = "default_warn_limit")]
    pub warn_process_size_mb: u32,
    /// Process heap size that triggers a kill, in MB (0 disables)
    #[serde(default = "default_kill_limit")]
    pub kill_process_size_mb: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            cookie: None,
            erl_path: default_erl(),
            extra_args: Vec::new(),
            working_dir: None,
            unique_name: false,
            attach: false,
            launch_context: LaunchContext::default(),
            code_context: CodeContext::default(),
            project_paths: Vec::new(),
            initial_call: None,
            bridge_module: default_bridge_module(),
            warn_process_size_mb: default_warn_limit(),
            kill_process_size_mb: default_kill_limit(),
        }
    }
}

impl RuntimeConfig {
    /// Create a config for the given node name
    pub fn named(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: LaunchContext) -> Self {
        self.launch_context = context;
        self
    }

    pub fn with_code_context(mut self, context: CodeContext) -> Self {
        self.code_context = context;
        self
    }

    pub fn with_initial_call(mut self, call: InitialCall) -> Self {
        self.initial_call = Some(call);
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_paths.push(path.into());
        self
    }

    /// Whether the node name carries a fully qualified host
    pub fn uses_long_name(&self) -> bool {
        self.node_name
            .split_once('@')
            .is_some_and(|(_, host)| host.contains('.'))
    }

    /// The name passed to the node, with a unique suffix when requested
    pub fn effective_node_name(&self, suffix: &str) -> String {
        if !self.unique_name {
            return self.node_name.clone();
        }
        match self.node_name.split_once('@') {
            Some((name, host)) => format!("{name}_{suffix}@{host}"),
            None => format!("{}_{suffix}", self.node_name),
        }
    }

    /// Command-line arguments for spawning the node
    pub fn node_args(&self, node_name: &str) -> Vec<String> {
        let mut args = Vec::new();
        let flag = if self.uses_long_name() { "-name" } else { "-sname" };
        args.push(flag.to_string());
        args.push(node_name.to_string());
        if let Some(cookie) = self.cookie.as_deref().filter(|c| !c.is_empty()) {
            args.push("-setcookie".to_string());
            args.push(cookie.to_string());
        }
        args.push("-noinput".to_string());
        args.push("-s".to_string());
        args.push(self.bridge_module.clone());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Managed nodes get their process monitor in watch mode
    pub fn watch(&self) -> bool {
        self.launch_context == LaunchContext::Managed
    }
}
