//! Configuration for the storefront session client
//!
//! Values come from serde defaults, an optional TOML/YAML/JSON file and
//! `STOREFRONT_*` environment variables, in increasing priority.

use crate::error::{CoreError, CoreResult};
use crate::StateDir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Prefix for environment overrides (`STOREFRONT_API_BASE_URL`, ...)
pub const ENV_PREFIX: &str = "STOREFRONT";

/// Session client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Root of the identity service and storefront API
    pub api_base_url: String,

    /// Seconds before access-token expiry at which silent refresh fires.
    /// Keep the default of 30 outside of tests.
    pub refresh_margin_secs: u64,

    /// Bounded timeout for identity-service calls, in seconds
    pub request_timeout_secs: u64,

    /// Inactivity window before the "continue session?" prompt, in seconds
    pub idle_timeout_secs: u64,

    /// Time the prompt may stay unanswered before forced logout, in seconds
    pub idle_grace_secs: u64,

    /// Location of the persisted token pair (defaults to the state directory)
    pub token_file: Option<PathBuf>,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            refresh_margin_secs: 30,
            request_timeout_secs: 15,
            idle_timeout_secs: 120,
            idle_grace_secs: 120,
            token_file: None,
            user_agent: concat!("storefront-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from an optional file plus environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the resulting
    /// configuration is invalid.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults and environment variables only
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables cannot be parsed.
    pub fn from_env() -> CoreResult<Self> {
        Self::load(None)
    }

    /// Check invariants that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` describing the first violation.
    pub fn validate(&self) -> CoreResult<()> {
        let url = Url::parse(&self.api_base_url)
            .map_err(|e| {
                CoreError::invalid_config(format!("api_base_url '{}': {e}", self.api_base_url))
            })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::invalid_config(format!(
                "api_base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.refresh_margin_secs == 0 {
            return Err(CoreError::invalid_config("refresh_margin_secs must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::invalid_config("request_timeout_secs must be > 0"));
        }
        if self.idle_timeout_secs == 0 || self.idle_grace_secs == 0 {
            return Err(CoreError::invalid_config("idle windows must be > 0"));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    pub const fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub const fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    /// Token file location, falling back to the state directory
    pub fn token_path(&self, state_dir: &StateDir) -> PathBuf {
        self.token_file
            .clone()
            .unwrap_or_else(|| state_dir.token_path())
    }

    /// Write this configuration as pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
