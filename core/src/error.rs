//! Core error types for the snapshot pipeline

use thiserror::Error;

/// Core error type for all operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema drift detected: {0}")]
    Drift(String),

    #[error("Clone failed: {0}")]
    Clone(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Compression failed: {0}")]
    Compress(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Local backup failed: {0}")]
    Backup(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Another run holds the lock {0}")]
    RunInProgress(String),

    #[error("Run cancelled before {0}")]
    Cancelled(String),

    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("Custom hook for table {table} failed: {message}")]
    Hook { table: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;
