//! Schedule endpoints. Every mutation publishes the schedule command to
//! the device before logging activity; a failed publish surfaces to the
//! caller and skips the log entry.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use cabio_bridge::{CommandPayload, Feed, LogJob};
use cabio_core::time::now_millis;
use cabio_storage::{Schedule, ScheduleAction, Weekday};
use uuid::Uuid;

use crate::extract::AuthUser;
use crate::handlers::cabinets::owned_cabinet;
use crate::models::{ApiError, MessageResponse};
use crate::server::ServerState;

#[derive(Debug, serde::Serialize)]
pub struct ScheduleListResponse {
    pub data: Vec<Schedule>,
}

/// `GET /api/cabinets/:cabinet_id/schedules`
pub async fn list(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
) -> Result<Json<ScheduleListResponse>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    Ok(Json(ScheduleListResponse {
        data: state.stores.schedules.list(&user.id, &cabinet.id)?,
    }))
}

/// `GET /api/cabinets/:cabinet_id/schedules/today`
pub async fn list_today(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
) -> Result<Json<ScheduleListResponse>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    Ok(Json(ScheduleListResponse {
        data: state
            .stores
            .schedules
            .list_for_day(&user.id, &cabinet.id, Weekday::today())?,
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct AddScheduleRequest {
    pub days: Vec<Weekday>,
    pub time: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub actions: Vec<ScheduleAction>,
}

fn default_enabled() -> bool {
    true
}

/// `POST /api/cabinets/:cabinet_id/schedules`
pub async fn add(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path(cabinet_id): Path<String>,
    Json(req): Json<AddScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let device_id = cabinet
        .device_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("Cabinet has no device yet"))?;
    if req.days.is_empty() {
        return Err(ApiError::bad_request("Schedule needs at least one day"));
    }

    let schedule = Schedule {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        cabinet_id: cabinet.id.clone(),
        days: req.days,
        time: req.time,
        enabled: req.enabled,
        actions: req.actions,
    };
    state.stores.schedules.save(&schedule)?;

    let payload = CommandPayload::schedule_upsert(&user.email, &device_id, &schedule);
    state
        .registry
        .publish_command(&user.username, Feed::Relay, &payload)
        .await?;

    state.queues.enqueue_log(LogJob {
        user_id: user.id.clone(),
        cabinet_id: cabinet.id.clone(),
        activity: format!("Schedule at {} added", schedule.time),
        timestamp: now_millis(),
    });
    Ok((StatusCode::CREATED, Json(schedule)))
}

#[derive(Debug, serde::Deserialize)]
pub struct UpdateScheduleRequest {
    #[serde(default)]
    pub days: Option<Vec<Weekday>>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub actions: Option<Vec<ScheduleAction>>,
}

/// `PATCH /api/cabinets/:cabinet_id/schedules/:schedule_id`
pub async fn update(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path((cabinet_id, schedule_id)): Path<(String, String)>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<Json<Schedule>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let device_id = cabinet
        .device_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("Cabinet has no device yet"))?;

    let mut schedule = state
        .stores
        .schedules
        .get(&user.id, &cabinet.id, &schedule_id)?
        .ok_or_else(|| ApiError::not_found("Schedule not found"))?;
    if let Some(days) = req.days {
        if days.is_empty() {
            return Err(ApiError::bad_request("Schedule needs at least one day"));
        }
        schedule.days = days;
    }
    if let Some(time) = req.time {
        schedule.time = time;
    }
    if let Some(enabled) = req.enabled {
        schedule.enabled = enabled;
    }
    if let Some(actions) = req.actions {
        schedule.actions = actions;
    }
    state.stores.schedules.save(&schedule)?;

    let payload = CommandPayload::schedule_upsert(&user.email, &device_id, &schedule);
    state
        .registry
        .publish_command(&user.username, Feed::Relay, &payload)
        .await?;

    state.queues.enqueue_log(LogJob {
        user_id: user.id.clone(),
        cabinet_id: cabinet.id.clone(),
        activity: format!("Schedule at {} updated", schedule.time),
        timestamp: now_millis(),
    });
    Ok(Json(schedule))
}

/// `PATCH /api/cabinets/:cabinet_id/schedules/:schedule_id/set-status`
pub async fn set_status(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path((cabinet_id, schedule_id)): Path<(String, String)>,
    Json(req): Json<SetScheduleStatusRequest>,
) -> Result<Json<Schedule>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let device_id = cabinet
        .device_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("Cabinet has no device yet"))?;

    let schedule =
        state
            .stores
            .schedules
            .set_enabled(&user.id, &cabinet.id, &schedule_id, req.enabled)?;

    let payload = CommandPayload::schedule_upsert(&user.email, &device_id, &schedule);
    state
        .registry
        .publish_command(&user.username, Feed::Relay, &payload)
        .await?;

    state.queues.enqueue_log(LogJob {
        user_id: user.id.clone(),
        cabinet_id: cabinet.id.clone(),
        activity: format!(
            "Schedule at {} {}",
            schedule.time,
            if req.enabled { "enabled" } else { "disabled" }
        ),
        timestamp: now_millis(),
    });
    Ok(Json(schedule))
}

#[derive(Debug, serde::Deserialize)]
pub struct SetScheduleStatusRequest {
    pub enabled: bool,
}

/// `DELETE /api/cabinets/:cabinet_id/schedules/:schedule_id`
pub async fn delete(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path((cabinet_id, schedule_id)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let device_id = cabinet
        .device_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("Cabinet has no device yet"))?;

    if !state
        .stores
        .schedules
        .delete(&user.id, &cabinet.id, &schedule_id)?
    {
        return Err(ApiError::not_found("Schedule not found"));
    }

    let payload = CommandPayload::schedule_delete(&user.email, &device_id, &schedule_id);
    state
        .registry
        .publish_command(&user.username, Feed::Relay, &payload)
        .await?;

    state.queues.enqueue_log(LogJob {
        user_id: user.id.clone(),
        cabinet_id: cabinet.id.clone(),
        activity: "Schedule deleted".to_string(),
        timestamp: now_millis(),
    });
    Ok(Json(MessageResponse::new("Schedule deleted")))
}
