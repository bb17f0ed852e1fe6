//! Command routing logic for CLI

use crate::args::{Cli, Commands, ConfigAction};
use crate::{commands, logging};
use beamlink_core::{BeamlinkConfig, LoggingConfig};
use std::path::Path;
use std::time::Duration;

/// Route CLI commands to their respective handlers
pub async fn route(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config: config_path,
        verbose,
        command,
    } = cli;
    let config_path = config_path.as_deref();

    match command {
        Commands::Launch(args) => {
            let config = load(config_path, verbose)?;
            commands::launch::execute(config, args, verbose).await
        }
        Commands::Call {
            module,
            function,
            args,
            timeout,
            node,
        } => {
            let config = load(config_path, verbose)?;
            let request = commands::call::CallRequest {
                module,
                function,
                args,
                timeout: timeout.map(Duration::from_secs),
            };
            commands::call::execute(config, node, request).await
        }
        Commands::Config { action } => {
            // Config commands must work on broken or missing files
            logging::init(&LoggingConfig::default(), verbose);
            match action {
                ConfigAction::Init { force } => commands::config::init(config_path, force),
                ConfigAction::Show => commands::config::show(config_path),
                ConfigAction::Validate => commands::config::validate(config_path),
            }
        }
    }
}

fn load(path: Option<&Path>, verbose: bool) -> anyhow::Result<BeamlinkConfig> {
    let config = BeamlinkConfig::load_or_default(path)?;
    logging::init(&config.logging, verbose);
    Ok(config)
}
