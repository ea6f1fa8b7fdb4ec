//! Error type shared by the storefront crates

use std::path::Path;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Failures loading configuration or touching the state directory
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem failure, with the path involved when known
    #[error("{}: {message}", path.as_deref().unwrap_or("IO error"))]
    Io {
        path: Option<String>,
        message: String,
    },

    #[error("Malformed JSON: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Filesystem failure on `path`
    pub fn io_at(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: Some(path.display().to_string()),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: None,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
