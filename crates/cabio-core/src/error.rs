//! Common error type shared across Cabio crates.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that are not specific to one subsystem.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
