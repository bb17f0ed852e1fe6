//! Loading, saving and validating the config file

use super::logging_config::LoggingConfig;
use super::runtime_config::RuntimeConfig;
use super::timeouts::TimeoutConfig;
use crate::error::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "beamlink.json";

/// Overrides the configured node name
pub const ENV_NODE_NAME: &str = "BEAMLINK_NODE_NAME";
/// Overrides the configured cookie
pub const ENV_COOKIE: &str = "BEAMLINK_COOKIE";
/// Overrides the node executable
pub const ENV_ERL: &str = "BEAMLINK_ERL";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeamlinkConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BeamlinkConfig {
    /// Default location: `<config dir>/beamlink/beamlink.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("beamlink").join(DEFAULT_CONFIG_FILE))
    }

    /// Load from a file, picking the format by extension
    pub fn load(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = expand_path(path.as_ref());
        let content = std::fs::read_to_string(&path)
            .map_err(|e| BackendError::io_at(path.display().to_string(), e.to_string()))?;
        let config = Self::parse(&content, &path)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from a file if it exists, defaults otherwise; env overrides applied either way
    pub fn load_or_default(path: Option<&Path>) -> BackendResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path)
            .map(|p| expand_path(&p));

        let mut config = match path {
            Some(p) if p.exists() => Self::load(&p)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.runtime.working_dir = config.runtime.working_dir.map(|dir| expand_path(&dir));
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> BackendResult<Self> {
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let parsed = if is_toml {
            toml::from_str(content).map_err(BackendError::from)
        } else {
            serde_json::from_str(content)
                .map_err(|e| BackendError::config(format!("invalid JSON configuration: {e}")))
        };
        parsed.map_err(|e| e.with_context(path.display().to_string()))
    }

    /// Write the config file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> BackendResult<()> {
        let path = expand_path(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| BackendError::config(e.to_string()))?
        };
        std::fs::write(&path, content)
            .map_err(|e| BackendError::io_at(path.display().to_string(), e.to_string()))?;
        Ok(())
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_NODE_NAME).filter(|v| !v.is_empty()) {
            self.runtime.node_name = name;
        }
        if let Some(cookie) = lookup(ENV_COOKIE) {
            self.runtime.cookie = Some(cookie);
        }
        if let Some(erl) = lookup(ENV_ERL).filter(|v| !v.is_empty()) {
            self.runtime.erl_path = erl;
        }
    }

    /// Reject configurations that cannot produce a working runtime
    pub fn validate(&self) -> BackendResult<()> {
        let runtime = &self.runtime;
        if runtime.node_name.trim().is_empty() {
            return Err(BackendError::config("node_name must not be empty"));
        }
        if let Some((name, host)) = runtime.node_name.split_once('@') {
            if name.is_empty() || host.is_empty() {
                return Err(BackendError::config(format!(
                    "malformed node name '{}'",
                    runtime.node_name
                )));
            }
        }
        let zero = self.timeouts.zero_fields();
        if !zero.is_empty() {
            return Err(BackendError::config(format!(
                "timeouts must be non-zero: {}",
                zero.join(", ")
            )));
        }
        if runtime.kill_process_size_mb > 0
            && runtime.warn_process_size_mb > runtime.kill_process_size_mb
        {
            return Err(BackendError::config(
                "warn_process_size_mb must not exceed kill_process_size_mb",
            ));
        }
        Ok(())
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}
