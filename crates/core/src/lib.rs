//! Storefront core types and utilities

pub mod config;
pub mod error;
pub mod state_dir;
pub mod logging;

pub use config::SessionConfig;
pub use error::{CoreError, CoreResult};
pub use state_dir::StateDir;
