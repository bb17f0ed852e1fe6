//! Conversions from foreign error types

use super::types::BackendError;

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::protocol(err.to_string())
    }
}

impl From<toml::de::Error> for BackendError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for BackendError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}
