//! CLI configuration utilities

use anyhow::{Context, Result};
use std::path::Path;
use storefront_core::{SessionConfig, StateDir};
use tracing::info;

/// Load configuration from an explicit file or the state directory default.
///
/// A missing default file is not an error; defaults and `STOREFRONT_*`
/// environment variables still apply.
pub fn load_config(path: Option<&Path>, state_dir: &StateDir) -> Result<SessionConfig> {
    let path = path.map_or_else(|| state_dir.config_path(), Path::to_path_buf);
    if path.exists() {
        info!("Loading configuration from: {}", path.display());
    }
    SessionConfig::load(Some(&path))
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Generate a default configuration file
pub fn generate_default_config(path: &Path) -> Result<()> {
    SessionConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}
