//! Error types for keel-core

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias using keel-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in keel-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or collection not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote call failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local durable storage error
    #[error("Storage error: {0}")]
    Storage(String),
}
