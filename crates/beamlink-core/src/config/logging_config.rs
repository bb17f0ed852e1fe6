//! Logging configuration

use serde::{Deserialize, Serialize};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error, or `target=level` lists)
    #[serde(default = "default_level")]
    pub level: String,
    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Merge with another logging config (other takes precedence)
    pub fn merge(&mut self, other: LoggingConfig) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
        self.format = other.format;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_logging_config_merge() {
        let mut config = LoggingConfig::default();
        config.merge(LoggingConfig {
            level: "beamlink_core=debug".to_string(),
            format: LogFormat::Json,
        });
        assert_eq!(config.level, "beamlink_core=debug");
        assert_eq!(config.format, LogFormat::Json);

        config.merge(LoggingConfig {
            level: String::new(),
            format: LogFormat::Compact,
        });
        assert_eq!(config.level, "beamlink_core=debug");
        assert_eq!(config.format, LogFormat::Compact);
    }
}
