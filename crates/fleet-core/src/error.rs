//! Error types for fleet-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using fleet-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fleet-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error surfaced to a caller that asked for it explicitly
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Share locator could not be decoded
    #[error("Import error: {0}")]
    Import(String),

    /// The sync engine task is no longer running
    #[error("Sync engine is not running")]
    EngineStopped,
}
