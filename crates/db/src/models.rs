//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types (`FlowDocument`, `ExecutionRecord`, ...) live in the
//! `engine` crate and are serialised into/out of the `serde_json::Value`
//! columns here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// flows
// ---------------------------------------------------------------------------

/// A persisted flow row — `definition` is a serialised
/// `engine::models::FlowDocument` (nodes, edges, `pinData`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlowRow {
    pub id: Uuid,
    pub name: String,
    pub definition: serde_json::Value,
    pub deployed: bool,
    pub scan_period_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// flow_executions
// ---------------------------------------------------------------------------

/// A persisted flow execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlowExecutionRow {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub trigger_node_id: Option<String>,
    pub node_outputs: serde_json::Value,
    pub error_log: serde_json::Value,
}

// ---------------------------------------------------------------------------
// flow_tag_dependencies
// ---------------------------------------------------------------------------

/// One row of `flow_tag_dependencies` — which nodes in which flows read or
/// write which tags, recomputed at the start of every invocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlowTagDependencyRow {
    pub flow_id: Uuid,
    pub tag_id: Uuid,
    pub node_id: String,
    pub dependency_type: String,
}

// ---------------------------------------------------------------------------
// tag_metadata
// ---------------------------------------------------------------------------

/// Immutable tag metadata.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TagMetadataRow {
    pub tag_id: Uuid,
    pub tag_path: String,
    pub tag_name: String,
    pub data_type: String,
    pub connection_id: Uuid,
    pub driver_type: String,
}

// ---------------------------------------------------------------------------
// node_libraries
// ---------------------------------------------------------------------------

/// A persisted library record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeLibraryRow {
    pub library_id: String,
    pub name: String,
    pub version: String,
    pub manifest: serde_json::Value,
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
    pub installed_by: Option<String>,
    pub last_loaded_at: Option<DateTime<Utc>>,
    pub load_errors: Option<String>,
}

// ---------------------------------------------------------------------------
// tag_values (time-series store)
// ---------------------------------------------------------------------------

/// One row of `tag_values` — a single stored reading. Exactly one of
/// `v_num` / `v_text` / `v_json` is populated, matching `TagData`'s
/// Number/Text/Structured variants; all `None` means a `Null` reading.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TagValueRow {
    pub ts: DateTime<Utc>,
    pub connection_id: Uuid,
    pub tag_id: Uuid,
    pub quality: i16,
    pub v_num: Option<f64>,
    pub v_text: Option<String>,
    pub v_json: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// system_metrics (time-series store)
// ---------------------------------------------------------------------------

/// One row of `system_metrics` — engine/runtime telemetry recorded under
/// `DriverType::System` tags (scan cycle time, memory, etc.).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemMetricRow {
    pub ts: DateTime<Utc>,
    pub tag_id: Uuid,
    pub v_num: f64,
}
