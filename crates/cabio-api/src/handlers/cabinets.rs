//! Cabinet CRUD and the per-cabinet overview.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use cabio_core::time::now_millis;
use cabio_storage::{
    BoardKind, Cabinet, LocationReading, Relay, ScalarReading, Schedule, SensorKind, User, Weekday,
};
use uuid::Uuid;

use crate::extract::AuthUser;
use crate::models::{ApiError, MessageResponse};
use crate::server::ServerState;

/// Load a cabinet owned by the caller, or 404.
pub(crate) fn owned_cabinet(
    state: &ServerState,
    user: &User,
    cabinet_id: &str,
) -> Result<Cabinet, ApiError> {
    state
        .stores
        .cabinets
        .get(&user.id, cabinet_id)?
        .ok_or_else(|| ApiError::not_found("Cabinet not found"))
}

#[derive(Debug, serde::Serialize)]
pub struct CabinetListResponse {
    pub data: Vec<Cabinet>,
}

/// `GET /api/cabinets`
pub async fn list(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
) -> Result<Json<CabinetListResponse>, ApiError> {
    Ok(Json(CabinetListResponse {
        data: state.stores.cabinets.list_for_user(&user.id)?,
    }))
}

/// `GET /api/cabinets/:cabinet_id`
pub async fn get(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
) -> Result<Json<Cabinet>, ApiError> {
    Ok(Json(owned_cabinet(&state, &user, &cabinet_id)?))
}

#[derive(Debug, serde::Deserialize)]
pub struct CreateCabinetRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub board: BoardKind,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// `POST /api/cabinets`
pub async fn create(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateCabinetRequest>,
) -> Result<(StatusCode, Json<Cabinet>), ApiError> {
    let now = now_millis();
    let cabinet = Cabinet {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        name: req.name,
        description: req.description,
        board: req.board,
        device_id: req.device_id,
        created_at: now,
        updated_at: now,
    };
    state.stores.cabinets.create(&cabinet)?;
    Ok((StatusCode::CREATED, Json(cabinet)))
}

#[derive(Debug, serde::Deserialize)]
pub struct UpdateCabinetRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub board: Option<BoardKind>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// `PATCH /api/cabinets/:cabinet_id`
pub async fn update(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
    Json(req): Json<UpdateCabinetRequest>,
) -> Result<Json<Cabinet>, ApiError> {
    let mut cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    if let Some(name) = req.name {
        cabinet.name = name;
    }
    if let Some(description) = req.description {
        cabinet.description = description;
    }
    if let Some(board) = req.board {
        cabinet.board = board;
    }
    if let Some(device_id) = req.device_id {
        cabinet.device_id = Some(device_id);
    }
    cabinet.updated_at = now_millis();
    state.stores.cabinets.update(&cabinet)?;
    Ok(Json(cabinet))
}

/// `DELETE /api/cabinets/:cabinet_id` — cascades through relays,
/// schedules, sensor series, boards, network info and logs.
pub async fn delete(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.stores.delete_cabinet(&user.id, &cabinet_id)? {
        return Err(ApiError::not_found("Cabinet not found"));
    }
    Ok(Json(MessageResponse::new("Cabinet deleted")))
}

#[derive(Debug, serde::Serialize)]
pub struct CabinetOverview {
    pub cabinet: Cabinet,
    pub relays: Vec<Relay>,
    pub relays_home: Vec<Relay>,
    pub latest_temperature: Option<ScalarReading>,
    pub latest_humidity: Option<ScalarReading>,
    pub latest_location: Option<LocationReading>,
    pub schedules: Vec<Schedule>,
    pub schedules_today: Vec<Schedule>,
}

/// `GET /api/cabinets/:cabinet_id/overview` — the dashboard snapshot.
pub async fn overview(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
) -> Result<Json<CabinetOverview>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let stores = &state.stores;

    let relays = stores.relays.list(&user.id, &cabinet.id)?;
    let relays_home = relays.iter().filter(|r| r.relay_home).cloned().collect();
    let schedules = stores.schedules.list(&user.id, &cabinet.id)?;
    let today = Weekday::today();
    let schedules_today = schedules
        .iter()
        .filter(|s| s.days.contains(&today))
        .cloned()
        .collect();

    Ok(Json(CabinetOverview {
        latest_temperature: stores
            .sensors
            .latest_scalar(SensorKind::Temperature, &user.id, &cabinet.id)?,
        latest_humidity: stores
            .sensors
            .latest_scalar(SensorKind::Humidity, &user.id, &cabinet.id)?,
        latest_location: stores.sensors.latest_location(&user.id, &cabinet.id)?,
        relays,
        relays_home,
        schedules,
        schedules_today,
        cabinet,
    }))
}
