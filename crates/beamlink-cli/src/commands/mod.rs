//! CLI commands

pub mod call;
pub mod config;
pub mod launch;

use crate::args::NodeArgs;
use beamlink_core::{BeamlinkConfig, ProcessLauncher, RuntimeSupervisor};
use std::sync::Arc;

/// Apply command-line overrides on top of the loaded configuration
pub fn apply_node_args(config: &mut BeamlinkConfig, args: &NodeArgs) {
    let runtime = &mut config.runtime;
    if let Some(name) = &args.name {
        runtime.node_name = name.clone();
    }
    if let Some(cookie) = &args.cookie {
        runtime.cookie = Some(cookie.clone());
    }
    if let Some(dir) = &args.working_dir {
        runtime.working_dir = Some(dir.clone());
    }
    runtime.unique_name |= args.unique_name;
    runtime.attach |= args.attach;
}

/// Supervisor for a node started through the process launcher
pub fn process_supervisor(config: &BeamlinkConfig) -> RuntimeSupervisor {
    RuntimeSupervisor::new(
        config.runtime.clone(),
        config.timeouts,
        Arc::new(ProcessLauncher::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_node_args_override_config() {
        let mut config = BeamlinkConfig::default();
        config.runtime.unique_name = true;
        let args = NodeArgs {
            name: Some("build@localhost".into()),
            cookie: Some("secret".into()),
            working_dir: Some(PathBuf::from("/srv/app")),
            unique_name: false,
            attach: true,
        };
        apply_node_args(&mut config, &args);

        assert_eq!(config.runtime.node_name, "build@localhost");
        assert_eq!(config.runtime.cookie.as_deref(), Some("secret"));
        assert_eq!(config.runtime.working_dir, Some(PathBuf::from("/srv/app")));
        assert!(config.runtime.unique_name);
        assert!(config.runtime.attach);
    }

    #[test]
    fn test_empty_node_args_keep_config() {
        let mut config = BeamlinkConfig::default();
        apply_node_args(&mut config, &NodeArgs::default());
        assert_eq!(config.runtime.node_name, "beamlink");
        assert!(config.runtime.cookie.is_none());
    }
}
