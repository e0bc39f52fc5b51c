use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] keel_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No content provided")]
    EmptyContent,
    #[error("Record ID cannot be empty")]
    EmptyId,
    #[error("No {0} found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Invalid value for {key}: {message}")]
    InvalidSetting { key: &'static str, message: String },
    #[error("Sync is not configured. Run `keel config set server-url <URL>` and `keel config set enabled true`.")]
    SyncNotConfigured,
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}
