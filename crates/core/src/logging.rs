//! Logging initialisation shared by the storefront binaries

use crate::error::CoreResult;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose events are shown at the requested level
const LOG_TARGETS: &[&str] = &["storefront", "storefront_core", "storefront_session"];

/// Build the default filter string for a level, e.g.
/// `storefront=debug,storefront_core=debug,storefront_session=debug`
pub fn default_filter(level: Level) -> String {
    let level_str = level.as_str().to_lowercase();
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level_str}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging: stderr always, plus a plain-text file under
/// `logs_dir` unless it is `None`. `RUST_LOG` overrides `level`.
///
/// # Errors
///
/// Returns an error if the log file cannot be created.
pub fn init_logging(level: Level, logs_dir: Option<&Path>, component: &str) -> CoreResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());

    if let Some(dir) = logs_dir {
        std::fs::create_dir_all(dir)?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{component}.log")))?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(log_file)
                    .with_ansi(false),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
