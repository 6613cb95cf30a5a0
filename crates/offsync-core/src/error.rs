//! Core error types for offsync-core.
//!
//! This module defines the error hierarchy using thiserror. Component-level
//! errors (`PersistError`, `SyncError`) live next to their components and are
//! wrapped here.

use std::path::PathBuf;
use thiserror::Error;

pub use crate::storage::PersistError;
pub use crate::sync::types::{RemoteError, SyncError};

/// Core error type for offsync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Series edit error: {0}")]
    SeriesEdit(#[from] SeriesEditError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    MissingKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Contract violations when editing a recurring series. Raised before any
/// state is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesEditError {
    #[error("Unknown edit mode: '{0}' (expected all, this or following)")]
    UnknownMode(String),

    #[error("Edit mode '{0}' requires the original occurrence start")]
    MissingOriginalStart(&'static str),

    #[error("Invalid original occurrence start '{0}'")]
    InvalidOriginalStart(String),

    #[error("Event not found: {0}")]
    UnknownEvent(String),

    #[error("Invalid recurrence rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },
}

/// External calendar/task API errors.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// No usable access token. Callers skip reconciliation quietly.
    #[error("No Google credential available")]
    CredentialMissing,

    #[error("Google API request failed (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },

    /// Incremental sync token rejected (HTTP 410).
    #[error("Sync token expired")]
    SyncTokenExpired,

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconcileError {
    pub fn is_credential_missing(&self) -> bool {
        matches!(self, ReconcileError::CredentialMissing)
    }
}

impl From<reqwest::Error> for ReconcileError {
    fn from(err: reqwest::Error) -> Self {
        ReconcileError::Api {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
