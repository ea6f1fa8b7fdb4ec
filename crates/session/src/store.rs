//! Durable storage for the token pair
//!
//! Reads and writes are synchronous and last-write-wins, so a `save` or
//! `clear` is visible to the next `load` as soon as the call returns.

use crate::error::StoreError;
use crate::token::TokenPair;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub type StoreResult<T> = Result<T, StoreError>;

/// Key/value holder for the access and refresh token
pub trait TokenStore: Send + Sync {
    fn save(&self, pair: &TokenPair) -> StoreResult<()>;
    fn load(&self) -> StoreResult<Option<TokenPair>>;
    fn clear(&self) -> StoreResult<()>;
}

/// Token store backed by a JSON file (`{"accessToken": .., "refreshToken": ..}`)
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, pair: &TokenPair) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(pair)?;
        let temp = self.temp_path();
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), "Saved token pair");
        Ok(())
    }

    fn load(&self) -> StoreResult<Option<TokenPair>> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pair: TokenPair = serde_json::from_slice(&content)?;
        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(pair))
    }

    fn clear(&self) -> StoreResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Cleared token pair");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory token store for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    pair: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            pair: Mutex::new(Some(pair)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, pair: &TokenPair) -> StoreResult<()> {
        *self.pair.lock().unwrap_or_else(PoisonError::into_inner) = Some(pair.clone());
        Ok(())
    }

    fn load(&self) -> StoreResult<Option<TokenPair>> {
        Ok(self
            .pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn clear(&self) -> StoreResult<()> {
        *self.pair.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
