//! Configuration management commands

use crate::console::CliConsole;
use anyhow::{Context, bail};
use beamlink_core::{BeamlinkConfig, UnifiedError};
use std::path::{Path, PathBuf};

fn resolve(path: Option<&Path>) -> anyhow::Result<PathBuf> {
    path.map(Path::to_path_buf)
        .or_else(BeamlinkConfig::default_path)
        .context("no config path given and no user config directory found")
}

/// Write a default configuration file
pub fn init(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let console = CliConsole::new(true);
    let path = resolve(path)?;
    if path.exists() && !force {
        bail!(
            "configuration file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    BeamlinkConfig::default().save(&path)?;
    console.success(&format!("Created configuration file: {}", path.display()));
    Ok(())
}

/// Show the effective configuration, environment overrides included
pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let console = CliConsole::new(true);
    console.print_header("Configuration");

    let file = resolve(path).ok();
    match file.as_deref() {
        Some(file) if file.exists() => console.info(&format!("Loaded from: {}", file.display())),
        Some(file) => console.warn(&format!("Configuration file not found: {}", file.display())),
        None => console.warn("No configuration file location"),
    }

    let config = BeamlinkConfig::load_or_default(file.as_deref())?;
    print_config(&console, &config);
    Ok(())
}

/// Validate a configuration file
pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    let console = CliConsole::new(true);
    console.print_header("Configuration Validation");

    let path = resolve(path)?;
    if !path.exists() {
        bail!("configuration file not found: {}", path.display());
    }

    let result = BeamlinkConfig::load(&path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });
    match result {
        Ok(config) => {
            console.success("Configuration is valid");
            print_config(&console, &config);
            Ok(())
        }
        Err(e) => {
            console.error(&format!("[{}] {}", e.error_code(), e.message()));
            Err(e.into())
        }
    }
}

fn print_config(console: &CliConsole, config: &BeamlinkConfig) {
    let runtime = &config.runtime;
    console.field("node name", &runtime.node_name);
    console.field("executable", &runtime.erl_path);
    console.field("launch context", runtime.launch_context);
    console.field("code context", runtime.code_context);
    console.field("attach", runtime.attach);
    console.field("unique name", runtime.unique_name);
    if let Some(dir) = &runtime.working_dir {
        console.field("working dir", dir.display());
    }
    for path in &runtime.project_paths {
        console.field("project path", path.display());
    }
    if let Some(call) = &runtime.initial_call {
        console.field("initial call", format!("{}:{}", call.module, call.function));
    }
    console.field(
        "process limits",
        format!(
            "warn {} MB, kill {} MB",
            runtime.warn_process_size_mb, runtime.kill_process_size_mb
        ),
    );
    console.field(
        "timeouts",
        format!(
            "launch {:?}, call {:?}, probe {:?}, close {:?}",
            config.timeouts.launch,
            config.timeouts.call,
            config.timeouts.probe,
            config.timeouts.close_grace
        ),
    );
    console.field("log level", &config.logging.level);
}
