//! Activity log and board firmware read endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use cabio_storage::{ActivityEntry, BoardFirmware};

use crate::extract::AuthUser;
use crate::handlers::cabinets::owned_cabinet;
use crate::models::ApiError;
use crate::server::ServerState;

const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Debug, serde::Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, serde::Serialize)]
pub struct LogListResponse {
    pub data: Vec<ActivityEntry>,
}

/// `GET /api/cabinets/:cabinet_id/logs` — most recent first.
pub async fn list(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogListResponse>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Ok(Json(LogListResponse {
        data: state.stores.logs.list_recent(&user.id, &cabinet.id, limit)?,
    }))
}

#[derive(Debug, serde::Serialize)]
pub struct BoardListResponse {
    pub data: Vec<BoardFirmware>,
}

/// `GET /api/cabinets/:cabinet_id/boards` — firmware versions.
pub async fn boards(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
) -> Result<Json<BoardListResponse>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    Ok(Json(BoardListResponse {
        data: state.stores.boards.list_for_cabinet(&user.id, &cabinet.id)?,
    }))
}
