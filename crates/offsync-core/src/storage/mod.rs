mod config;
pub mod database;
pub mod migrations;
pub mod store;

pub use config::{Config, DispatcherConfig, GoogleConfig, RemoteConfig};
pub use database::Database;
pub use store::{MemoryStore, SyncStore};

use std::path::PathBuf;

/// Durable-storage failure surfaced to write-through callers.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Disk or quota exhausted. Later writes may not survive a restart.
    #[error("Local storage is full: {0}")]
    CapacityExceeded(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Corrupt stored data: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl PersistError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, PersistError::CapacityExceeded(_))
    }
}

impl From<rusqlite::Error> for PersistError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _) if code.code == rusqlite::ErrorCode::DiskFull => {
                PersistError::CapacityExceeded(err.to_string())
            }
            _ => PersistError::Storage(err.to_string()),
        }
    }
}

/// Returns `~/.config/offsync[-dev]/` based on OFFSYNC_ENV.
///
/// Set OFFSYNC_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("OFFSYNC_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("offsync-dev")
    } else {
        base_dir.join("offsync")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
