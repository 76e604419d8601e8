//! Common error types for the roster service

use thiserror::Error;

use crate::cipher::CipherError;

/// Common result type for roster operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the roster crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write rejected because it collides with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Credentials or session rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated (or anonymous) caller not allowed to do this
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Field encryption or decryption failure
    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV encoding/decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Stored data that cannot be decoded (bad uuid, non-object row data, ...)
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
