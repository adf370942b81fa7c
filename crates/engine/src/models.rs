//! Core domain models for the flow execution engine.
//!
//! These types are the source of truth for what a flow looks like in
//! memory; they serialise to/from the JSONB `definition` column of the
//! `flows` table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodes::TagValue;

/// A single node instance within a flow.
/// `position` is opaque to the engine — carried through for the UI only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub position: serde_json::Value,
}

/// A directed edge between two node ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_node_id: String,
    pub source_port: String,
    pub target_node_id: String,
    pub target_port: String,
}

/// A flow document: nodes, edges, and the execution-scoped state that
/// travels with them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDocument {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Freezes a node's output during partial execution — `node_id ->
    /// TagValue`.
    #[serde(default)]
    pub pin_data: HashMap<String, TagValue>,
    /// Flow-scoped key/value store persisted across invocations,
    /// accessible from `Script` nodes via `$flow.state`.
    #[serde(default)]
    pub static_data: serde_json::Value,
    #[serde(default)]
    pub deployed: bool,
    /// The scan period for continuous mode, or `None` to only ever run
    /// on demand.
    #[serde(default)]
    pub scan_period_ms: Option<u64>,
}

impl FlowDocument {
    #[must_use]
    pub fn new(name: impl Into<String>, nodes: Vec<NodeInstance>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            edges,
            pin_data: HashMap::new(),
            static_data: serde_json::Value::Object(serde_json::Map::new()),
            deployed: false,
            scan_period_ms: None,
        }
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges whose target is `node_id`, in document order.
    #[must_use]
    pub fn incoming_edges<'a>(&'a self, node_id: &str) -> Vec<&'a Edge> {
        self.edges.iter().filter(|e| e.target_node_id == node_id).collect()
    }
}

/// Terminal and in-flight states of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One entry in `ExecutionRecord::error_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub node_id: Option<String>,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A single node's recorded output within an [`ExecutionRecord`] — the
/// engine's persistence-facing projection of [`nodes::NodeOutput`]
/// (`std::time::Duration` does not serialise, so `execution_time_ms` is
/// stored instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutputRecord {
    pub tag_value: TagValue,
    pub operation: String,
    pub inputs: serde_json::Value,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl From<nodes::NodeOutput> for NodeOutputRecord {
    fn from(output: nodes::NodeOutput) -> Self {
        Self {
            tag_value: output.tag_value,
            operation: output.operation,
            inputs: output.inputs,
            execution_time_ms: output.execution_time.as_millis() as u64,
            timestamp: output.timestamp,
            error: output.error,
        }
    }
}

/// `{id, flow_id, status, started_at, completed_at, trigger_node_id,
/// node_outputs{}, error_log[]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub trigger_node_id: Option<String>,
    pub node_outputs: HashMap<String, NodeOutputRecord>,
    pub error_log: Vec<ErrorLogEntry>,
}

impl ExecutionRecord {
    #[must_use]
    pub fn start(flow_id: Uuid, trigger_node_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            trigger_node_id,
            node_outputs: HashMap::new(),
            error_log: Vec::new(),
        }
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, node_id: Option<String>, kind: &str, message: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_log.push(ErrorLogEntry { node_id, kind: kind.to_string(), message: message.into(), at: Utc::now() });
    }

    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

/// One row of `flow_tag_dependencies` — recomputed at the start of every
/// invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagDependencyDirection {
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTagDependency {
    pub flow_id: Uuid,
    pub tag_id: Uuid,
    pub node_id: String,
    pub direction: TagDependencyDirection,
}
