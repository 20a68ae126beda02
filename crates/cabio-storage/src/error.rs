//! Error types for the storage crate.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Not found error.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Unique constraint violation ("<field> already exists").
    #[error("{0} already exists")]
    Conflict(String),

    /// A bounded collection is full (relay caps).
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(format!("redb error: {}", e))
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(format!("redb transaction error: {}", e))
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(format!("redb table error: {}", e))
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(format!("redb storage error: {}", e))
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(format!("redb commit error: {}", e))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(format!("redb database error: {}", e))
    }
}

impl From<Error> for cabio_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => cabio_core::Error::Io(e),
            Error::Serialization(s) => cabio_core::Error::Serialization(s),
            Error::NotFound(s) => cabio_core::Error::NotFound(s),
            Error::InvalidInput(s) => cabio_core::Error::Validation(s),
            other => cabio_core::Error::Validation(other.to_string()),
        }
    }
}
