//! Shared response types and error mapping for handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cabio_bridge::BridgeError;
use cabio_storage::{Role, User};
use serde::{Deserialize, Serialize};

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A status + message pair that renders as an `ErrorResponse`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<cabio_storage::Error> for ApiError {
    fn from(e: cabio_storage::Error) -> Self {
        match e {
            cabio_storage::Error::Conflict(_) | cabio_storage::Error::LimitExceeded(_) => {
                ApiError::bad_request(e.to_string())
            }
            cabio_storage::Error::NotFound(_) => ApiError::not_found(e.to_string()),
            cabio_storage::Error::InvalidInput(_) => ApiError::bad_request(e.to_string()),
            other => {
                tracing::error!(error = %other, "storage failure");
                ApiError::internal("Server error")
            }
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::MissingCredentials(_)
            | BridgeError::NotConnected(_)
            | BridgeError::AlreadyConnected(_) => ApiError::bad_request(e.to_string()),
            BridgeError::BadCredentials => ApiError::unauthorized("Incorrect password."),
            BridgeError::Storage(inner) => inner.into(),
            other => {
                tracing::error!(error = %other, "bridge failure");
                ApiError::internal(other.to_string())
            }
        }
    }
}

/// User profile as exposed over the API: never includes the password
/// hash, the broker key or the refresh token.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub fullname: String,
    pub email: String,
    pub role: Role,
    pub broker_username: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: i64,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            fullname: user.fullname,
            email: user.email,
            role: user.role,
            broker_username: user.broker_username,
            phone_number: user.phone_number,
            created_at: user.created_at,
        }
    }
}

/// Uniform `{"message": ...}` body for endpoints with nothing to return.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
