//! Error types for mineru-batch
//!
//! This module provides the error taxonomy shared by every layer of the crate:
//! - Caller errors surfaced synchronously (`Validation`, `Resume`, `Config`)
//! - Remote service errors (`Auth`, `Transient`, `Permanent`, `NotFound`, `Expired`)
//! - Local materialization errors (`CorruptArchive`, `Io`)
//! - Persistence errors (`Database`, `Sqlx`, `Serialization`)
//!
//! Errors raised inside a running batch never reach the caller directly: the
//! worker folds them into a `Failed` event carrying an error summary.

use thiserror::Error;

/// Result type alias for mineru-batch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mineru-batch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "persistence.history_limit")
        key: Option<String>,
    },

    /// Bad caller input (empty file list, unreadable path, rejected options)
    #[error("validation error: {0}")]
    Validation(String),

    /// Credential missing or rejected by the remote service
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network failure, timeout or 5xx response; retried per the retry policy
    #[error("transient error: {0}")]
    Transient(String),

    /// Remote rejected the request for good (file too large, corrupted upload, ...)
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Remote does not know the batch id
    #[error("not found: {0}")]
    NotFound(String),

    /// Result URL expired; the batch has to be re-run
    #[error("result link expired, re-run required: {0}")]
    Expired(String),

    /// Downloaded result package is not a readable archive
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// Persisted state does not allow resuming the batch
    #[error("cannot resume batch: {0}")]
    Resume(String),

    /// Local disk failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// HTTP client error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be decoded
    #[error("corrupt record for batch {batch_id}: {reason}")]
    CorruptRecord {
        /// Batch id of the unreadable row
        batch_id: String,
        /// What was wrong with it
        reason: String,
    },
}

impl Error {
    /// Machine-readable error code, stable across releases
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(_) => "validation_error",
            Error::Auth(_) => "auth_error",
            Error::Transient(_) => "transient_error",
            Error::Permanent(_) => "permanent_error",
            Error::NotFound(_) => "not_found",
            Error::Expired(_) => "expired",
            Error::CorruptArchive(_) => "corrupt_archive",
            Error::Resume(_) => "resume_error",
            Error::Io(_) => "io_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}
