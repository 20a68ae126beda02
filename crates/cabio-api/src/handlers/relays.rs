//! Relay endpoints. State changes flow through the same pipeline as the
//! MQTT side: store update, command publish, then an activity log entry
//! through the log queue. A failed publish stops the pipeline before the
//! log entry.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use cabio_bridge::{CommandPayload, Feed, LogJob};
use cabio_core::time::now_millis;
use cabio_storage::{Cabinet, Relay, Role, User, RELAY_CAP};

use crate::extract::AuthUser;
use crate::handlers::cabinets::owned_cabinet;
use crate::models::{ApiError, MessageResponse};
use crate::server::ServerState;

fn log_activity(state: &ServerState, user: &User, cabinet_id: &str, activity: String) {
    state.queues.enqueue_log(LogJob {
        user_id: user.id.clone(),
        cabinet_id: cabinet_id.to_string(),
        activity,
        timestamp: now_millis(),
    });
}

fn device_id_of(cabinet: &Cabinet) -> Result<String, ApiError> {
    cabinet
        .device_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("Cabinet has no device yet"))
}

#[derive(Debug, serde::Serialize)]
pub struct RelayListResponse {
    pub data: Vec<Relay>,
}

/// `GET /api/cabinets/:cabinet_id/relays`
pub async fn list(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
) -> Result<Json<RelayListResponse>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    Ok(Json(RelayListResponse {
        data: state.stores.relays.list(&user.id, &cabinet.id)?,
    }))
}

/// `GET /api/cabinets/:cabinet_id/relays/home`
pub async fn list_home(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
) -> Result<Json<RelayListResponse>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    Ok(Json(RelayListResponse {
        data: state.stores.relays.list_home(&user.id, &cabinet.id)?,
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct AddRelayRequest {
    pub relay_id: u32,
    #[serde(default)]
    pub relay_name: Option<String>,
}

/// `POST /api/cabinets/:cabinet_id/relays`
pub async fn add(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
    Json(req): Json<AddRelayRequest>,
) -> Result<(StatusCode, Json<Relay>), ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;

    let relay = Relay {
        user_id: user.id.clone(),
        cabinet_id: cabinet.id.clone(),
        relay_id: req.relay_id,
        relay_name: req
            .relay_name
            .unwrap_or_else(|| format!("Relay {}", req.relay_id)),
        state: false,
        relay_home: false,
    };
    // Non-admin accounts are capped; admins add freely.
    let cap = match user.role {
        Role::User => Some(RELAY_CAP),
        Role::Admin => None,
    };
    state.stores.relays.add(&relay, cap)?;

    log_activity(&state, &user, &cabinet.id, format!("Relay {} added", relay.relay_id));
    Ok((StatusCode::CREATED, Json(relay)))
}

#[derive(Debug, serde::Deserialize)]
pub struct UpdateRelayRequest {
    pub relay_id: u32,
    #[serde(default)]
    pub new_relay_id: Option<u32>,
    #[serde(default)]
    pub relay_name: Option<String>,
}

/// `PATCH /api/cabinets/:cabinet_id/relays/set`
pub async fn update(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
    Json(req): Json<UpdateRelayRequest>,
) -> Result<Json<Relay>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let relay = state.stores.relays.update(
        &user.id,
        &cabinet.id,
        req.relay_id,
        req.new_relay_id,
        req.relay_name,
    )?;

    let activity = match req.new_relay_id {
        Some(new_id) if new_id != req.relay_id => {
            format!("Relay {} changed to {}", req.relay_id, new_id)
        }
        _ => format!("Relay {} name changed to {}", req.relay_id, relay.relay_name),
    };
    log_activity(&state, &user, &cabinet.id, activity);
    Ok(Json(relay))
}

/// `DELETE /api/cabinets/:cabinet_id/relays/:relay_id`
pub async fn delete(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path((cabinet_id, relay_id)): Path<(String, u32)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    if !state.stores.relays.delete(&user.id, &cabinet.id, relay_id)? {
        return Err(ApiError::not_found("Relay not found."));
    }
    log_activity(&state, &user, &cabinet.id, format!("Relay {} deleted", relay_id));
    Ok(Json(MessageResponse::new("Relay deleted")))
}

#[derive(Debug, serde::Deserialize)]
pub struct SetStatusRequest {
    pub relay_id: u32,
    pub state: bool,
}

/// `PATCH /api/cabinets/:cabinet_id/relays/set-status`
///
/// The manual control pipeline: persist the new state, publish the
/// command on the caller's broker session, then log the activity.
pub async fn set_status(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<Relay>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let device_id = device_id_of(&cabinet)?;

    let relay = state
        .stores
        .relays
        .set_state(&user.id, &cabinet.id, req.relay_id, req.state)?
        .ok_or_else(|| ApiError::not_found("Relay not found."))?;

    let payload = CommandPayload::manual(&user.email, &device_id, req.relay_id, req.state);
    state
        .registry
        .publish_command(&user.username, Feed::Relay, &payload)
        .await?;

    log_activity(
        &state,
        &user,
        &cabinet.id,
        format!("Relay {} {}", req.relay_id, if req.state { "ON" } else { "OFF" }),
    );
    Ok(Json(relay))
}

#[derive(Debug, serde::Deserialize)]
pub struct SetHomeRequest {
    pub relay_id: u32,
    pub relay_home: bool,
}

/// `PATCH /api/cabinets/:cabinet_id/relays/set-home`
pub async fn set_home(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
    Json(req): Json<SetHomeRequest>,
) -> Result<Json<Relay>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let relay = state
        .stores
        .relays
        .set_home(&user.id, &cabinet.id, req.relay_id, req.relay_home)?;

    log_activity(
        &state,
        &user,
        &cabinet.id,
        format!(
            "Relay {} {} shown on HomePage",
            req.relay_id,
            if req.relay_home { "is" } else { "is not" }
        ),
    );
    Ok(Json(relay))
}
