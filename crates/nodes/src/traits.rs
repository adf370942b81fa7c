//! The `ExecutableNode` trait — the contract every node, built-in or
//! library-provided, must fulfil.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::description::NodeDescription;
use crate::error::NodeError;
use crate::tag::{DriverType, TagValue};

/// The result of one node invocation — a [`TagValue`] enriched with
/// execution metadata: the operation that ran, its inputs, execution time,
/// timestamp, and an optional error.
#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub tag_value: TagValue,
    pub operation: String,
    pub inputs: Value,
    pub execution_time: std::time::Duration,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl NodeOutput {
    #[must_use]
    pub fn new(
        tag_value: TagValue,
        operation: impl Into<String>,
        inputs: Value,
        execution_time: std::time::Duration,
    ) -> Self {
        Self {
            tag_value,
            operation: operation.into(),
            inputs,
            execution_time,
            timestamp: Utc::now(),
            error: None,
        }
    }
}

/// What a node does when its `execute` returns an error and `onError` is
/// configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Stop,
    Continue,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Stop
    }
}

/// Only `INTERNAL` tags accept writes from the engine.
#[must_use]
pub fn writable(driver_type: DriverType) -> bool {
    matches!(driver_type, DriverType::Internal)
}

/// The core node trait. All built-ins and externally-loaded node types must
/// implement this; the registry stores factories that produce boxed
/// instances of it.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// The type's immutable, schema-validated description.
    fn description(&self) -> NodeDescription;

    /// Instance-level validation of the node's configured `data`, run by
    /// the registry's `validate_node` and the flow validator's step 6. The
    /// default accepts anything — most node types have no extra rules
    /// beyond the structural schema.
    fn validate(&self, _data: &Value) -> Vec<String> {
        Vec::new()
    }

    /// Diagnostic log lines accumulated during the most recent `execute`
    /// call, surfaced alongside the node's output. Most nodes have none;
    /// `Script` uses this to relay captured `console` output.
    fn log_messages(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run the node to completion, consuming `ctx` for input/output access.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError>;
}

/// A factory that builds a fresh `ExecutableNode` instance. The registry
/// calls this once per registration (to read the description) and the
/// engine calls it once per deployed node, since some node types (Gate)
/// carry private per-instance state that must not leak across flows.
pub trait NodeFactory: Send + Sync {
    fn create(&self) -> Box<dyn ExecutableNode>;
}

impl<F> NodeFactory for F
where
    F: Fn() -> Box<dyn ExecutableNode> + Send + Sync,
{
    fn create(&self) -> Box<dyn ExecutableNode> {
        (self)()
    }
}
