use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

use super::AppState;
use db::repository::control;

#[derive(Deserialize, Default)]
pub struct RunDto {
    /// Node ids to run — `None` runs the whole flow.
    #[serde(default)]
    pub subset: Option<Vec<String>>,
    #[serde(default)]
    pub trigger_node_id: Option<String>,
}

/// Run a deployed flow on demand through the shared [`engine::Executor`] —
/// this is the one handler that does real work rather than passing
/// straight through to the database.
pub async fn run(Path(id): Path<Uuid>, State(state): State<AppState>, Json(payload): Json<RunDto>) -> Result<Json<engine::ExecutionRecord>, StatusCode> {
    let row = control::get_flow(&state.pool, id).await.map_err(|e| match e {
        db::DbError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })?;
    let flow: engine::FlowDocument = serde_json::from_value(row.definition).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let subset: Option<HashSet<String>> = payload.subset.map(|ids| ids.into_iter().collect());
    state
        .executor
        .run(&flow, subset.as_ref(), payload.trigger_node_id)
        .await
        .map(Json)
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list(Path(flow_id): Path<Uuid>, State(state): State<AppState>, Query(q): Query<ListQuery>) -> Result<Json<Vec<db::models::FlowExecutionRow>>, StatusCode> {
    control::list_flow_executions(&state.pool, flow_id, q.limit).await.map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<db::models::FlowExecutionRow>, StatusCode> {
    control::get_flow_execution(&state.pool, id).await.map(Json).map_err(|e| match e {
        db::DbError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })
}
