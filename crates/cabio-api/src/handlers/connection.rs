//! Broker connection management endpoints.

use axum::extract::State;
use axum::Json;
use cabio_storage::User;

use crate::extract::AuthUser;
use crate::models::{ApiError, MessageResponse, UserProfile};
use crate::server::ServerState;

#[derive(Debug, serde::Deserialize)]
pub struct DisconnectRequest {
    #[serde(default)]
    pub current_password: Option<String>,
}

/// `POST /api/connection/disconnect`
///
/// Tearing down the device link requires the current password, so a
/// stolen API token alone cannot sever it.
pub async fn disconnect(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Json(req): Json<DisconnectRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let password = req
        .current_password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Current password is required."))?;

    state.registry.disconnect(&user, &password).await?;
    Ok(Json(MessageResponse::new(format!(
        "Disconnected from broker for user: {}",
        user.username
    ))))
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct ReconnectRequest {
    /// Optional profile patch applied after a successful reconnect, for
    /// the edit-profile flow that changes broker credentials.
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub broker_username: Option<String>,
    #[serde(default)]
    pub broker_key: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ReconnectResponse {
    pub message: String,
    pub profile: UserProfile,
}

/// `POST /api/connection/reconnect`
///
/// An explicit sequential pipeline: apply the credential patch to the
/// in-memory record, reconnect with it, and only persist the profile
/// once the new session is up. A reconnect with bad new credentials
/// leaves the stored profile untouched.
pub async fn reconnect(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Json(req): Json<ReconnectRequest>,
) -> Result<Json<ReconnectResponse>, ApiError> {
    let mut updated: User = user;
    let has_patch = req.fullname.is_some()
        || req.phone_number.is_some()
        || req.broker_username.is_some()
        || req.broker_key.is_some();
    if let Some(fullname) = req.fullname {
        updated.fullname = fullname;
    }
    if let Some(phone_number) = req.phone_number {
        updated.phone_number = Some(phone_number);
    }
    if let Some(broker_username) = req.broker_username {
        updated.broker_username = Some(broker_username);
    }
    if let Some(broker_key) = req.broker_key {
        updated.broker_key = Some(broker_key);
    }

    state.registry.reconnect(&updated).await?;

    if has_patch {
        state.stores.users.update(&updated)?;
    }

    Ok(Json(ReconnectResponse {
        message: format!("Reconnected to broker for user: {}", updated.username),
        profile: updated.into(),
    }))
}

/// `GET /api/connection/status`
pub async fn status(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "connected": state.registry.is_connected(&user.username),
    }))
}
