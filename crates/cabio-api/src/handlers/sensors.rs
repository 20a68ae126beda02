//! Sensor endpoints: latest value, history, and manual inserts that go
//! through the sensor queue exactly like broker-side ingestion.

use axum::extract::{Path, Query, State};
use axum::Json;
use cabio_bridge::{SensorJob, SensorValue};
use cabio_core::time::now_millis;
use cabio_storage::SensorKind;
use serde_json::json;

use crate::extract::AuthUser;
use crate::handlers::cabinets::owned_cabinet;
use crate::models::ApiError;
use crate::server::ServerState;

fn parse_kind(kind: &str) -> Result<SensorKind, ApiError> {
    match kind {
        "temperature" => Ok(SensorKind::Temperature),
        "humidity" => Ok(SensorKind::Humidity),
        "location" => Ok(SensorKind::Location),
        other => Err(ApiError::not_found(format!("Unknown sensor kind {}", other))),
    }
}

/// `GET /api/cabinets/:cabinet_id/sensors/:kind` — the current value.
pub async fn latest(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path((cabinet_id, kind)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let kind = parse_kind(&kind)?;

    match kind {
        SensorKind::Location => {
            let reading = state
                .stores
                .sensors
                .latest_location(&user.id, &cabinet.id)?
                .ok_or_else(|| ApiError::not_found("No location data found for this cabinet."))?;
            Ok(Json(json!({
                "X": reading.x,
                "Y": reading.y,
                "timestamp": reading.timestamp,
            })))
        }
        scalar => {
            let reading = state
                .stores
                .sensors
                .latest_scalar(scalar, &user.id, &cabinet.id)?
                .ok_or_else(|| {
                    ApiError::not_found(format!("No {} data found for this cabinet.", scalar))
                })?;
            Ok(Json(json!({
                "data": reading.value,
                "timestamp": reading.timestamp,
            })))
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
}

/// `GET /api/cabinets/:cabinet_id/sensors/:kind/history`
pub async fn history(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path((cabinet_id, kind)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let kind = parse_kind(&kind)?;
    let start = query.start.unwrap_or(i64::MIN);
    let end = query.end.unwrap_or(i64::MAX);

    match kind {
        SensorKind::Location => {
            let readings = state
                .stores
                .sensors
                .query_locations(&user.id, &cabinet.id, start, end)?;
            Ok(Json(json!({ "data": readings })))
        }
        scalar => {
            let readings = state
                .stores
                .sensors
                .query_scalars(scalar, &user.id, &cabinet.id, start, end)?;
            Ok(Json(json!({ "data": readings })))
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct InsertReadingRequest {
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// `POST /api/cabinets/:cabinet_id/sensors/:kind` — manual insert,
/// enqueued like any device report. The handler returns once the job is
/// queued, not once it is written.
pub async fn insert(
    State(state): State<ServerState>,
    AuthUser(user): AuthUser,
    Path((cabinet_id, kind)): Path<(String, String)>,
    Json(req): Json<InsertReadingRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cabinet = owned_cabinet(&state, &user, &cabinet_id)?;
    let kind = parse_kind(&kind)?;
    let timestamp = req.timestamp.unwrap_or_else(now_millis);

    let value = match kind {
        SensorKind::Location => {
            let raw = req
                .data
                .as_str()
                .ok_or_else(|| ApiError::bad_request("Location data must be a string"))?;
            if !raw.contains('-') {
                return Err(ApiError::bad_request(
                    "Wrong format. Expected \"X-Y\" format.",
                ));
            }
            SensorValue::Raw(raw.to_string())
        }
        _ => {
            let scalar = match &req.data {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| ApiError::bad_request("Sensor data must be numeric"))?;
            SensorValue::Scalar(scalar)
        }
    };

    state.queues.enqueue_sensor(SensorJob {
        user_id: user.id.clone(),
        cabinet_id: cabinet.id.clone(),
        kind,
        value,
        timestamp,
    });

    Ok(Json(json!({ "data": req.data })))
}
