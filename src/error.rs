//! Error types for the state store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Malformed action, rejected before any state mutation.
    #[error("Invalid action: {0}")]
    Validation(String),

    /// Dispatch was called from inside an in-flight dispatch.
    #[error("Reducers and middleware may not dispatch actions while a dispatch is in flight")]
    Reentrancy,

    #[error("Lifecycle violation: {0}")]
    Lifecycle(String),

    #[error("Integrity check failed for {id}: expected {expected}, got {got}")]
    Integrity {
        id: String,
        expected: String,
        got: String,
    },

    #[error("Persistence failed after {attempts} attempt(s): {message}")]
    Persistence { attempts: u32, message: String },

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Reducer error: {0}")]
    Reducer(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("History entry not found: {0}")]
    EntryNotFound(String),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Storage is locked by another process")]
    Locked,

    #[error("Backend not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// Shorthand for a persistence failure wrapping another error.
    pub fn persistence(attempts: u32, source: impl std::fmt::Display) -> Self {
        StoreError::Persistence {
            attempts,
            message: source.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            StoreError::Deserialization(e.to_string())
        } else {
            StoreError::Serialization(e.to_string())
        }
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(e: toml::de::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
