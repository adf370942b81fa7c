//! `api` crate — HTTP surface, out of scope as a product surface (no auth,
//! no UI) but kept as the thin collaborator every other process-facing
//! crate in this workspace gets: flow CRUD/deploy/run over `Executor` and
//! `db::repository::control`, and library load/unload/reload over
//! `registry::LibraryManager`. Everything here is a direct pass-through —
//! the actual behaviour lives in `engine` and `registry`.
//!
//! Exposes:
//!   GET    /api/v1/flows
//!   POST   /api/v1/flows
//!   GET    /api/v1/flows/:id
//!   PUT    /api/v1/flows/:id
//!   DELETE /api/v1/flows/:id
//!   POST   /api/v1/flows/:id/deploy
//!   POST   /api/v1/flows/:id/run
//!   GET    /api/v1/flows/:id/executions
//!   GET    /api/v1/executions/:id
//!   GET    /api/v1/libraries
//!   POST   /api/v1/libraries/:id/load
//!   POST   /api/v1/libraries/:id/unload
//!   POST   /api/v1/libraries/:id/reload

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use db::DbPool;
use engine::Executor;
use registry::{LibraryManager, NodeRegistry};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub registry: Arc<NodeRegistry>,
    pub executor: Arc<Executor>,
    pub libraries: Arc<LibraryManager>,
}

pub async fn serve(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api_router = Router::new()
        .route("/flows", get(handlers::flows::list).post(handlers::flows::create))
        .route("/flows/:id", get(handlers::flows::get).put(handlers::flows::update).delete(handlers::flows::delete))
        .route("/flows/:id/deploy", post(handlers::flows::deploy))
        .route("/flows/:id/run", post(handlers::executions::run))
        .route("/flows/:id/executions", get(handlers::executions::list))
        .route("/executions/:id", get(handlers::executions::get))
        .route("/libraries", get(handlers::libraries::list))
        .route("/libraries/:id/load", post(handlers::libraries::load))
        .route("/libraries/:id/unload", post(handlers::libraries::unload))
        .route("/libraries/:id/reload", post(handlers::libraries::reload));

    let app = Router::new().nest("/api/v1", api_router).layer(cors).layer(TraceLayer::new_for_http()).with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
