//! Control-database repository functions — flows, flow executions, tag
//! dependencies, tag metadata, and node libraries.
//!
//! Fixed-shape queries use `sqlx::query_as!`/`sqlx::query!`. The one
//! exception is [`PgControlStore::query`], which backs
//! `ControlStore::query` — a node can hand it arbitrary SQL and positional
//! JSON parameters, so it can't be compile-time checked and instead goes
//! through the generic `bind`/`row_to_json` machinery in [`crate::rows`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use nodes::context::ControlStore;
use nodes::error::NodeError;

use crate::models::{FlowExecutionRow, FlowRow, FlowTagDependencyRow, NodeLibraryRow};
use crate::rows::{bind_params, row_to_json};
use crate::DbError;

// ---------------------------------------------------------------------------
// flows
// ---------------------------------------------------------------------------

/// Insert a new flow. `definition` is the serialised
/// `engine::models::FlowDocument`.
pub async fn create_flow(pool: &PgPool, id: Uuid, name: &str, definition: Value) -> Result<FlowRow, DbError> {
    let now = Utc::now();
    let row = sqlx::query_as!(
        FlowRow,
        r#"
        INSERT INTO flows (id, name, definition, deployed, scan_period_ms, created_at, updated_at)
        VALUES ($1, $2, $3, false, NULL, $4, $4)
        RETURNING id, name, definition, deployed, scan_period_ms, created_at, updated_at
        "#,
        id,
        name,
        definition,
        now,
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Overwrite an existing flow's definition, leaving `deployed` untouched.
pub async fn update_flow_definition(pool: &PgPool, id: Uuid, name: &str, definition: Value) -> Result<FlowRow, DbError> {
    let row = sqlx::query_as!(
        FlowRow,
        r#"
        UPDATE flows SET name = $2, definition = $3, updated_at = $4
        WHERE id = $1
        RETURNING id, name, definition, deployed, scan_period_ms, created_at, updated_at
        "#,
        id,
        name,
        definition,
        Utc::now(),
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// Flip a flow's `deployed` flag and, for continuous flows, its scan
/// period — the validator has already run by the time this is called.
pub async fn set_flow_deployed(pool: &PgPool, id: Uuid, deployed: bool, scan_period_ms: Option<i64>) -> Result<FlowRow, DbError> {
    let row = sqlx::query_as!(
        FlowRow,
        r#"
        UPDATE flows SET deployed = $2, scan_period_ms = $3, updated_at = $4
        WHERE id = $1
        RETURNING id, name, definition, deployed, scan_period_ms, created_at, updated_at
        "#,
        id,
        deployed,
        scan_period_ms,
        Utc::now(),
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(row)
}

pub async fn get_flow(pool: &PgPool, id: Uuid) -> Result<FlowRow, DbError> {
    let row = sqlx::query_as!(
        FlowRow,
        r#"SELECT id, name, definition, deployed, scan_period_ms, created_at, updated_at FROM flows WHERE id = $1"#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(row)
}

pub async fn list_flows(pool: &PgPool) -> Result<Vec<FlowRow>, DbError> {
    let rows = sqlx::query_as!(
        FlowRow,
        r#"SELECT id, name, definition, deployed, scan_period_ms, created_at, updated_at FROM flows ORDER BY updated_at DESC"#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn delete_flow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query!("DELETE FROM flows WHERE id = $1", id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// flow_executions
// ---------------------------------------------------------------------------

/// Record the start of a flow invocation. Called from `engine::Executor`
/// before the node walk begins; failures here are logged and swallowed by
/// the caller.
pub async fn insert_flow_execution(
    pool: &PgPool,
    id: Uuid,
    flow_id: Uuid,
    trigger_node_id: Option<&str>,
    started_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        INSERT INTO flow_executions (id, flow_id, status, started_at, completed_at, trigger_node_id, node_outputs, error_log)
        VALUES ($1, $2, 'running', $3, NULL, $4, '{}'::jsonb, '[]'::jsonb)
        "#,
        id,
        flow_id,
        started_at,
        trigger_node_id,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the final status of a flow invocation.
pub async fn update_flow_execution(
    pool: &PgPool,
    id: Uuid,
    status: &str,
    completed_at: Option<DateTime<Utc>>,
    node_outputs: Value,
    error_log: Value,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        UPDATE flow_executions
        SET status = $2, completed_at = $3, node_outputs = $4, error_log = $5
        WHERE id = $1
        "#,
        id,
        status,
        completed_at,
        node_outputs,
        error_log,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_flow_execution(pool: &PgPool, id: Uuid) -> Result<FlowExecutionRow, DbError> {
    let row = sqlx::query_as!(
        FlowExecutionRow,
        r#"
        SELECT id, flow_id, status, started_at, completed_at, trigger_node_id, node_outputs, error_log
        FROM flow_executions WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(row)
}

pub async fn list_flow_executions(pool: &PgPool, flow_id: Uuid, limit: i64) -> Result<Vec<FlowExecutionRow>, DbError> {
    let rows = sqlx::query_as!(
        FlowExecutionRow,
        r#"
        SELECT id, flow_id, status, started_at, completed_at, trigger_node_id, node_outputs, error_log
        FROM flow_executions WHERE flow_id = $1 ORDER BY started_at DESC LIMIT $2
        "#,
        flow_id,
        limit,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// flow_tag_dependencies
// ---------------------------------------------------------------------------

/// Replace the full set of tag dependencies for a flow in one transaction —
/// recomputed at the start of every invocation, so stale
/// entries from a since-edited flow never linger.
pub async fn replace_flow_tag_dependencies(pool: &PgPool, flow_id: Uuid, rows: &[(Uuid, String, &'static str)]) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query!("DELETE FROM flow_tag_dependencies WHERE flow_id = $1", flow_id).execute(&mut *tx).await?;
    for (tag_id, node_id, dependency_type) in rows {
        sqlx::query!(
            r#"
            INSERT INTO flow_tag_dependencies (flow_id, tag_id, node_id, dependency_type)
            VALUES ($1, $2, $3, $4)
            "#,
            flow_id,
            tag_id,
            node_id,
            dependency_type,
        )
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Every flow that depends on `tag_id`, for the library manager's
/// "unloading a node type used by a deployed flow" warning path.
pub async fn flows_depending_on_tag(pool: &PgPool, tag_id: Uuid) -> Result<Vec<FlowTagDependencyRow>, DbError> {
    let rows = sqlx::query_as!(
        FlowTagDependencyRow,
        r#"SELECT flow_id, tag_id, node_id, dependency_type FROM flow_tag_dependencies WHERE tag_id = $1"#,
        tag_id,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// node_libraries
// ---------------------------------------------------------------------------

pub async fn upsert_node_library(pool: &PgPool, library_id: &str, name: &str, version: &str, manifest: Value, installed_by: Option<&str>) -> Result<NodeLibraryRow, DbError> {
    let row = sqlx::query_as!(
        NodeLibraryRow,
        r#"
        INSERT INTO node_libraries (library_id, name, version, manifest, enabled, installed_at, installed_by, last_loaded_at, load_errors)
        VALUES ($1, $2, $3, $4, true, $5, $6, NULL, NULL)
        ON CONFLICT (library_id) DO UPDATE
            SET name = $2, version = $3, manifest = $4, installed_by = $6
        RETURNING library_id, name, version, manifest, enabled, installed_at, installed_by, last_loaded_at, load_errors
        "#,
        library_id,
        name,
        version,
        manifest,
        Utc::now(),
        installed_by,
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn set_node_library_enabled(pool: &PgPool, library_id: &str, enabled: bool) -> Result<(), DbError> {
    let result = sqlx::query!("UPDATE node_libraries SET enabled = $2 WHERE library_id = $1", library_id, enabled)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub async fn record_library_load_result(pool: &PgPool, library_id: &str, load_errors: Option<&str>) -> Result<(), DbError> {
    sqlx::query!(
        "UPDATE node_libraries SET last_loaded_at = $2, load_errors = $3 WHERE library_id = $1",
        library_id,
        Utc::now(),
        load_errors,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_node_libraries(pool: &PgPool) -> Result<Vec<NodeLibraryRow>, DbError> {
    let rows = sqlx::query_as!(
        NodeLibraryRow,
        r#"SELECT library_id, name, version, manifest, enabled, installed_at, installed_by, last_loaded_at, load_errors FROM node_libraries ORDER BY installed_at ASC"#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Library ids enabled at startup — the library manager's auto-load set.
pub async fn enabled_library_ids(pool: &PgPool) -> Result<Vec<String>, DbError> {
    let ids = sqlx::query_scalar!("SELECT library_id FROM node_libraries WHERE enabled = true")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

// ---------------------------------------------------------------------------
// ControlStore implementation
// ---------------------------------------------------------------------------

/// The `nodes::context::ControlStore` implementation backing the engine in
/// production — a thin adapter over the pool that runs whatever SQL a node
/// hands it (`tag-input`'s `tag_metadata` lookup, custom script queries) and
/// converts rows to JSON generically rather than through compile-time
/// checked macros.
pub struct PgControlStore {
    pool: PgPool,
}

impl PgControlStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ControlStore for PgControlStore {
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, NodeError> {
        let query = bind_params(sqlx::query(sql), &params);
        let rows = query.fetch_all(&self.pool).await.map_err(|e| NodeError::Transient(e.to_string()))?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

impl From<DbError> for NodeError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => NodeError::NotFound(err.to_string()),
            other => NodeError::Transient(other.to_string()),
        }
    }
}
