use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use super::AppState;
use db::repository::control;
use engine::validator;

#[derive(serde::Deserialize)]
pub struct FlowDto {
    pub name: String,
    pub definition: Value,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<db::models::FlowRow>>, StatusCode> {
    control::list_flows(&state.pool).await.map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<db::models::FlowRow>, StatusCode> {
    match control::get_flow(&state.pool, id).await {
        Ok(row) => Ok(Json(row)),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Saving a draft only ever touches `definition`/`name` — never `deployed`
///. `definition` is checked against `validate_for_save`, the
/// looser of the two validation levels, before it's persisted.
pub async fn create(State(state): State<AppState>, Json(payload): Json<FlowDto>) -> Result<(StatusCode, Json<db::models::FlowRow>), StatusCode> {
    let flow: engine::FlowDocument = serde_json::from_value(payload.definition.clone()).map_err(|_| StatusCode::BAD_REQUEST)?;
    let report = validator::validate_for_save(&flow, &registry_stub());
    if !report.valid {
        return Err(StatusCode::BAD_REQUEST);
    }
    control::create_flow(&state.pool, flow.id, &payload.name, payload.definition)
        .await
        .map(|row| (StatusCode::CREATED, Json(row)))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn update(Path(id): Path<Uuid>, State(state): State<AppState>, Json(payload): Json<FlowDto>) -> Result<Json<db::models::FlowRow>, StatusCode> {
    let _ = id;
    control::update_flow_definition(&state.pool, id, &payload.name, payload.definition)
        .await
        .map(Json)
        .map_err(|e| match e {
            db::DbError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })
}

pub async fn delete(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    control::delete_flow(&state.pool, id).await.map(|_| StatusCode::NO_CONTENT).map_err(|e| match e {
        db::DbError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })
}

/// Promote a saved draft to deployed — runs the strict validator
/// (`validate_for_deploy`) first, matching the executor's own pre-flight
/// check, so a flow can never be marked deployed while it would fail at
/// run time.
pub async fn deploy(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<db::models::FlowRow>, StatusCode> {
    let row = control::get_flow(&state.pool, id).await.map_err(|e| match e {
        db::DbError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })?;
    let flow: engine::FlowDocument = serde_json::from_value(row.definition).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let report = validator::validate_for_deploy(&flow, &state.registry);
    if !report.valid {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let scan_period_ms = flow.scan_period_ms.map(|ms| ms as i64);
    control::set_flow_deployed(&state.pool, id, true, scan_period_ms).await.map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// A throwaway, empty registry used only to run the looser "save" pass,
/// which only checks structural shape, not `NodeRegistry`-backed schema
/// validation — `validate_for_save` never calls into the registry for
/// anything beyond what an empty one already answers.
fn registry_stub() -> registry::NodeRegistry {
    registry::NodeRegistry::new()
}
