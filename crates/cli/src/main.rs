//! Storefront CLI - session-aware client for the storefront API

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use std::path::PathBuf;
use storefront_core::StateDir;
use tracing::{Level, error, info};

#[derive(Parser)]
#[command(name = "storefront")]
#[command(about = "Storefront client with silent token refresh")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// State directory for config, tokens and logs
    #[arg(short = 'd', long, global = true, env = "STOREFRONT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Configuration file (defaults to <state dir>/config/storefront.json)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Disable file logging (only log to stderr)
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let state_dir = cli
        .state_dir
        .clone()
        .map_or_else(StateDir::new, StateDir::with_override);
    state_dir.create_directories()?;

    let component = match &cli.command {
        Commands::Watch => "watch",
        _ => "cli",
    };
    let logs_dir = (!cli.no_file_log).then(|| state_dir.logs_dir());
    storefront_core::logging::init_logging(cli.log_level.into(), logs_dir.as_deref(), component)?;

    info!(state_dir = %state_dir.data_dir().display(), "Starting storefront CLI");

    match cli.command.execute(state_dir, cli.config).await {
        Ok(()) => {
            info!("Command completed successfully");
        }
        Err(e) => {
            error!("Command failed: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }

    Ok(())
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}
