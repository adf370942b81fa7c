//! The per-node, per-invocation execution context facade.
//!
//! Defined here, in the `nodes` crate, so both the engine and individual
//! node implementations can depend on it without a circular dependency.
//! The context never exposes a raw DB handle or bus client: everything
//! goes through the three small traits below, which `db` and `bus`
//! implement without `nodes` ever depending on either of them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::NodeError;
use crate::tag::{DriverType, TagValue};

/// Read/write access to the control database, scoped so the node never
/// sees connection pooling, transactions, or cancellation plumbing.
#[async_trait]
pub trait ControlStore: Send + Sync {
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, NodeError>;
}

/// Read access to the time-series store (`tag_values` / `system_metrics`).
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, NodeError>;

    /// The latest stored value for a tag, or `None` if the tag has never
    /// been written.
    async fn latest_tag_value(
        &self,
        tag_id: Uuid,
        driver_type: DriverType,
    ) -> Result<Option<TagValue>, NodeError>;

    /// Historical readings within the last `window_secs` seconds, oldest
    /// first.
    async fn history(&self, tag_id: Uuid, window_secs: i64) -> Result<Vec<TagValue>, NodeError>;
}

/// Fire-and-forget publish access to the telemetry bus.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, subject: &str, payload: Value) -> Result<(), NodeError>;
}

/// Zero-latency in-memory cache of recently produced tag values.
pub trait RuntimeCache: Send + Sync {
    fn get_tag_value(&self, tag_id: Uuid) -> Option<TagValue>;
    fn set_tag_value(&self, tag_id: Uuid, value: TagValue);
}

/// Read-only view of the flow document a node is executing within.
#[derive(Debug, Clone)]
pub struct FlowView {
    pub flow_id: Uuid,
    pub static_data: Value,
}

/// Read-only view of the in-flight execution record.
#[derive(Debug, Clone)]
pub struct ExecutionView {
    pub execution_id: Uuid,
    pub trigger_node_id: Option<String>,
}

/// Everything a node's `execute` method is handed.
pub struct ExecutionContext {
    pub flow: FlowView,
    pub execution: ExecutionView,
    pub node_id: String,
    pub node_type: String,
    pub params: Value,

    inputs: HashMap<String, TagValue>,
    control: Arc<dyn ControlStore>,
    tsdb: Arc<dyn TimeSeriesStore>,
    bus: Arc<dyn Publisher>,
    runtime_cache: Arc<dyn RuntimeCache>,
}

impl ExecutionContext {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flow: FlowView,
        execution: ExecutionView,
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        params: Value,
        inputs: HashMap<String, TagValue>,
        control: Arc<dyn ControlStore>,
        tsdb: Arc<dyn TimeSeriesStore>,
        bus: Arc<dyn Publisher>,
        runtime_cache: Arc<dyn RuntimeCache>,
    ) -> Self {
        Self {
            flow,
            execution,
            node_id: node_id.into(),
            node_type: node_type.into(),
            params,
            inputs,
            control,
            tsdb,
            bus,
            runtime_cache,
        }
    }

    /// Read the value on a named input port.
    ///
    /// In single-shot mode this reads from the sibling `node_outputs` map
    /// (the executor resolves edges into `inputs` before constructing the
    /// context); in continuous mode it reads from the input-state manager.
    /// Either way the node sees the same flat `port -> TagValue` map.
    #[must_use]
    pub fn get_input_value(&self, port: &str) -> Option<&TagValue> {
        self.inputs.get(port)
    }

    #[must_use]
    pub fn get_input_count(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn input_ports(&self) -> Vec<&str> {
        self.inputs.keys().map(String::as_str).collect()
    }

    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, NodeError> {
        self.control.query(sql, params).await
    }

    pub async fn tsdb_query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, NodeError> {
        self.tsdb.query(sql, params).await
    }

    pub async fn latest_tag_value(
        &self,
        tag_id: Uuid,
        driver_type: DriverType,
    ) -> Result<Option<TagValue>, NodeError> {
        self.tsdb.latest_tag_value(tag_id, driver_type).await
    }

    pub async fn tag_history(&self, tag_id: Uuid, window_secs: i64) -> Result<Vec<TagValue>, NodeError> {
        self.tsdb.history(tag_id, window_secs).await
    }

    pub async fn publish_to_nats(&self, subject: &str, payload: Value) -> Result<(), NodeError> {
        self.bus.publish(subject, payload).await
    }

    #[must_use]
    pub fn runtime_state(&self) -> &dyn RuntimeCache {
        self.runtime_cache.as_ref()
    }

    /// Clone of the underlying control-store handle, for callers (the
    /// `Script` node's sandbox adapters) that must hold their own owned
    /// reference rather than borrow through `ExecutionContext`.
    #[must_use]
    pub fn control_handle(&self) -> Arc<dyn ControlStore> {
        self.control.clone()
    }

    #[must_use]
    pub fn tsdb_handle(&self) -> Arc<dyn TimeSeriesStore> {
        self.tsdb.clone()
    }

    #[must_use]
    pub fn runtime_cache_handle(&self) -> Arc<dyn RuntimeCache> {
        self.runtime_cache.clone()
    }

    pub fn log_info(&self, message: &str) {
        info!(flow_id = %self.flow.flow_id, execution_id = %self.execution.execution_id, node_id = %self.node_id, node_type = %self.node_type, "{message}");
    }

    pub fn log_debug(&self, message: &str) {
        debug!(flow_id = %self.flow.flow_id, execution_id = %self.execution.execution_id, node_id = %self.node_id, node_type = %self.node_type, "{message}");
    }

    pub fn log_warn(&self, message: &str) {
        warn!(flow_id = %self.flow.flow_id, execution_id = %self.execution.execution_id, node_id = %self.node_id, node_type = %self.node_type, "{message}");
    }

    pub fn log_error(&self, message: &str) {
        error!(flow_id = %self.flow.flow_id, execution_id = %self.execution.execution_id, node_id = %self.node_id, node_type = %self.node_type, "{message}");
    }
}
