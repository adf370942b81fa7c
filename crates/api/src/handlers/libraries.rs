use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::AppState;
use db::repository::control;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<db::models::NodeLibraryRow>>, StatusCode> {
    control::list_node_libraries(&state.pool).await.map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Load a library already installed under the libraries root. The caller
/// is expected to have uploaded/unpacked the package out of band — this
/// endpoint only drives the in-process [`registry::LibraryManager`] and
/// records the outcome.
pub async fn load(Path(library_id): Path<String>, State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let root = state.libraries.scan_available().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !root.iter().any(|id| id == &library_id) {
        return Err(StatusCode::NOT_FOUND);
    }
    let path = state.libraries.library_path(&library_id);
    let outcome = state.libraries.load_library(&path);
    let load_errors = outcome.as_ref().err().map(ToString::to_string);
    let _ = control::record_library_load_result(&state.pool, &library_id, load_errors.as_deref()).await;
    match outcome {
        Ok(outcome) => Ok(Json(serde_json::json!({"libraryId": outcome.library_id, "nodeTypes": outcome.node_types}))),
        Err(_) => Err(StatusCode::UNPROCESSABLE_ENTITY),
    }
}

pub async fn unload(Path(library_id): Path<String>, State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .libraries
        .unload_library(&library_id)
        .map(|removed| Json(serde_json::json!({"removed": removed})))
        .map_err(|_| StatusCode::NOT_FOUND)
}

pub async fn reload(Path(library_id): Path<String>, State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .libraries
        .reload_library(&library_id)
        .map(|outcome| Json(serde_json::json!({"libraryId": outcome.library_id, "nodeTypes": outcome.node_types})))
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)
}
