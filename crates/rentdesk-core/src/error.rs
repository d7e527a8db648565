//! Error types for rentdesk-core

use thiserror::Error;

use crate::models::DatasetKind;
use crate::remote::RemoteError;

/// Result type alias using rentdesk-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rentdesk-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage medium error (quota, corruption, poisoned lock)
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote store error that could not be absorbed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Neither the local nor the remote store accepted a write
    #[error("Both backends failed for {dataset}: local: {local}; remote: {remote}")]
    BothBackendsFailed {
        dataset: DatasetKind,
        local: String,
        remote: String,
    },
}
