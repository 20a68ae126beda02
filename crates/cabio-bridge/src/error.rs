//! Error types for the broker bridge.

use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised by the ingestion and command-dispatch pipeline.
///
/// Device-originated problems (malformed payloads, unknown cabinets) are
/// recovered locally with a log line and never reach callers; the
/// variants here surface on caller-initiated paths: connect, disconnect,
/// reconnect and command publish.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The user record is missing its broker username or key.
    #[error("user {0} has no broker credentials")]
    MissingCredentials(String),

    /// A command was published without a live session.
    #[error("no live broker session for user {0}")]
    NotConnected(String),

    /// A session already exists for this user.
    #[error("a broker session already exists for user {0}")]
    AlreadyConnected(String),

    /// Reauthentication before disconnect failed.
    #[error("incorrect password")]
    BadCredentials,

    /// Broker-level connect or transport failure.
    #[error("broker transport error: {0}")]
    Transport(String),

    /// Outbound publish failed or timed out.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Password hashing/verification failure.
    #[error("password verification error: {0}")]
    Password(String),

    /// Underlying store failure.
    #[error(transparent)]
    Storage(#[from] cabio_storage::Error),

    /// Payload serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<bcrypt::BcryptError> for BridgeError {
    fn from(e: bcrypt::BcryptError) -> Self {
        BridgeError::Password(e.to_string())
    }
}
