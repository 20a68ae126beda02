//! Login and registration.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use cabio_core::time::now_millis;
use cabio_storage::{Cabinet, Role, User};
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{ApiError, MessageResponse, UserProfile};
use crate::server::ServerState;

#[derive(Debug, serde::Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, serde::Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub access_token: String,
    pub refresh_token: String,
    pub profile: UserProfile,
    pub cabinets: Vec<Cabinet>,
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<ServerState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let mut user = state
        .stores
        .users
        .find_by_email(&req.email)?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    let valid = bcrypt::verify(&req.password, &user.password_hash)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !valid {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    let access_token = state.tokens.sign_access(&user.id);
    let refresh_token = state.tokens.sign_refresh(&user.id);
    user.refresh_token = Some(refresh_token.clone());
    state.stores.users.update(&user)?;

    let cabinets = state.stores.cabinets.list_for_user(&user.id)?;

    Ok(Json(LoginResponse {
        message: "Login successful!".to_string(),
        access_token,
        refresh_token,
        profile: user.into(),
        cabinets,
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub fullname: String,
    pub email: String,
    pub password: String,
    pub broker_username: String,
    pub broker_key: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub profile: UserProfile,
}

/// `POST /api/auth/register`
///
/// Registration opens the broker session before persisting the account:
/// a user whose device cloud credentials do not work is not created. If
/// the insert then hits a duplicate email/username, the fresh session is
/// torn down again.
pub async fn register(
    State(state): State<ServerState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    if req.broker_username.is_empty() || req.broker_key.is_empty() {
        return Err(ApiError::bad_request(format!(
            "User {} does not have broker credentials",
            req.username
        )));
    }
    if state.registry.is_connected(&req.username) {
        return Err(ApiError::bad_request(format!(
            "User {} already has a broker session",
            req.username
        )));
    }

    let password_hash =
        bcrypt::hash(&req.password, bcrypt::DEFAULT_COST).map_err(|e| ApiError::internal(e.to_string()))?;
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: req.username,
        fullname: req.fullname,
        email: req.email,
        password_hash,
        role: Role::User,
        broker_username: Some(req.broker_username),
        broker_key: Some(req.broker_key),
        phone_number: req.phone_number,
        refresh_token: None,
        created_at: now_millis(),
    };

    state.registry.connect(&user).await?;

    if let Err(e) = state.stores.users.create(&user) {
        // Roll the session back: the account does not exist.
        error!(username = %user.username, error = %e, "registration insert failed");
        state.registry.teardown(&user.username).await;
        return Err(e.into());
    }

    info!(username = %user.username, "user registered and connected");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            profile: user.into(),
        }),
    ))
}

#[derive(Debug, serde::Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, serde::Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// `POST /api/auth/refresh`
pub async fn refresh(
    State(state): State<ServerState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let claims = state
        .tokens
        .verify(&req.refresh_token)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired refresh token"))?;
    if claims.kind != crate::auth::TokenKind::Refresh {
        return Err(ApiError::unauthorized("Not a refresh token"));
    }

    let user = state
        .stores
        .users
        .get(&claims.sub)?
        .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;
    // The stored token must match: logging in again invalidates older
    // refresh tokens.
    if user.refresh_token.as_deref() != Some(req.refresh_token.as_str()) {
        return Err(ApiError::unauthorized("Refresh token superseded"));
    }

    Ok(Json(RefreshResponse {
        access_token: state.tokens.sign_access(&user.id),
    }))
}

/// `DELETE /api/auth/account` — delete the account and cascade through
/// everything it owns. The broker session is closed first.
pub async fn delete_account(
    State(state): State<ServerState>,
    crate::extract::AuthUser(user): crate::extract::AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    state.registry.teardown(&user.username).await;
    state.stores.delete_user(&user.id)?;
    Ok(Json(MessageResponse::new("Account deleted")))
}
