//! The executor — drives one flow invocation end to end.
//!
//! Walks the flow as a true DAG rather than a linear chain: each node's
//! inputs are resolved from the outputs already recorded for its upstream
//! edges, and the whole `node_outputs` map is what downstream nodes, and
//! the persisted execution record, ultimately see.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use nodes::context::{ControlStore, ExecutionContext, ExecutionView, FlowView, Publisher, RuntimeCache, TimeSeriesStore};
use nodes::traits::OnError;
use registry::NodeRegistry;

use crate::dag;
use crate::error::EngineError;
use crate::models::{ExecutionRecord, ExecutionStatus, FlowDocument, FlowTagDependency, NodeOutputRecord, TagDependencyDirection};
use crate::validator;

/// The collaborators a flow invocation needs, gathered in one place so
/// `Executor::new` doesn't grow an ever-longer argument list the way the
/// facade in `nodes::context` does.
pub struct Collaborators {
    pub control: Arc<dyn ControlStore>,
    pub tsdb: Arc<dyn TimeSeriesStore>,
    pub bus: Arc<dyn Publisher>,
    pub runtime_cache: Arc<dyn RuntimeCache>,
}

/// Runs flow invocations against a shared [`NodeRegistry`] and set of
/// collaborators. Stateless beyond those — construct one per process and
/// share it between on-demand `run` invocations and the scan-cycle engine.
pub struct Executor {
    registry: Arc<NodeRegistry>,
    collaborators: Collaborators,
    /// Persistence is best-effort and must never mask the primary error;
    /// `None` runs the executor with no database at all, which is
    /// how tests exercise it against `nodes::mock::MockNode` without a live
    /// Postgres instance.
    pool: Option<db::DbPool>,
}

impl Executor {
    #[must_use]
    pub fn new(registry: Arc<NodeRegistry>, collaborators: Collaborators, pool: Option<db::DbPool>) -> Self {
        Self { registry, collaborators, pool }
    }

    /// Run `flow` once, start to finish. `subset` restricts execution to a
    /// requested set of target nodes (partial execution); `trigger_node_id`
    /// identifies the node that initiated the invocation, if any.
    #[instrument(skip(self, flow), fields(flow_id = %flow.id))]
    pub async fn run(
        &self,
        flow: &FlowDocument,
        subset: Option<&HashSet<String>>,
        trigger_node_id: Option<String>,
    ) -> Result<ExecutionRecord, EngineError> {
        self.run_seeded(flow, subset, trigger_node_id, HashMap::new()).await
    }

    /// Same as [`Executor::run`], but `seed_outputs` pre-populates the
    /// `node_outputs` map before the walk starts. The scan-cycle engine
    /// (`crate::scan`) uses this to carry the previous tick's outputs
    /// forward: any node that doesn't run this tick — excluded from a
    /// partial subset, or failed with `onError = continue` without
    /// producing a value — keeps its seeded entry, so a downstream node
    /// reading that edge never sees an empty input between cycles.
    #[instrument(skip(self, flow, seed_outputs), fields(flow_id = %flow.id))]
    pub async fn run_seeded(
        &self,
        flow: &FlowDocument,
        subset: Option<&HashSet<String>>,
        trigger_node_id: Option<String>,
        seed_outputs: HashMap<String, NodeOutputRecord>,
    ) -> Result<ExecutionRecord, EngineError> {
        let report = validator::validate_for_deploy(flow, &self.registry);
        if !report.valid {
            return Err(EngineError::Validation(report.errors.join("; ")));
        }

        let mut record = ExecutionRecord::start(flow.id, trigger_node_id);
        record.node_outputs = seed_outputs;
        self.persist_start(&record).await;
        self.persist_tag_dependencies(flow).await;

        let sorted = dag::schedule(flow, subset)?;
        info!(nodes = sorted.len(), "executing flow");

        for node_id in &sorted {
            let Some(node) = flow.node(node_id) else {
                // The scheduler only ever returns ids present in `flow.nodes`.
                unreachable!("scheduled node '{node_id}' missing from flow document");
            };

            if let Some(pinned) = flow.pin_data.get(node_id) {
                record.node_outputs.insert(
                    node_id.clone(),
                    NodeOutputRecord {
                        tag_value: pinned.clone(),
                        operation: "pinned".to_string(),
                        inputs: serde_json::Value::Null,
                        execution_time_ms: 0,
                        timestamp: Utc::now(),
                        error: None,
                    },
                );
                continue;
            }

            let Some(instance) = self.registry.get_instance(&node.node_type) else {
                let message = format!("no implementation registered for node type '{}'", node.node_type);
                error!(node_id = %node_id, "{message}");
                record.fail(Some(node_id.clone()), "NotFound", &message);
                self.persist_finish(&record).await;
                return Err(EngineError::UnknownNodeType(node.node_type.clone()));
            };

            let inputs = self.resolve_inputs(flow, node_id, &record.node_outputs);
            let ctx = ExecutionContext::new(
                FlowView { flow_id: flow.id, static_data: flow.static_data.clone() },
                ExecutionView { execution_id: record.id, trigger_node_id: record.trigger_node_id.clone() },
                node_id.clone(),
                node.node_type.clone(),
                node.data.clone(),
                inputs,
                self.collaborators.control.clone(),
                self.collaborators.tsdb.clone(),
                self.collaborators.bus.clone(),
                self.collaborators.runtime_cache.clone(),
            );

            let started = Instant::now();
            match instance.execute(&ctx).await {
                Ok(output) => {
                    info!(node_id = %node_id, elapsed_ms = started.elapsed().as_millis(), "node succeeded");
                    record.node_outputs.insert(node_id.clone(), output.into());
                }
                Err(err) => {
                    let on_error = on_error_of(node);
                    warn!(node_id = %node_id, error = %err, ?on_error, "node failed");
                    record.error_log.push(crate::models::ErrorLogEntry {
                        node_id: Some(node_id.clone()),
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                        at: Utc::now(),
                    });
                    if matches!(on_error, OnError::Stop) {
                        record.fail(Some(node_id.clone()), err.kind(), err.to_string());
                        self.persist_finish(&record).await;
                        return Err(EngineError::NodeFatal { node_id: node_id.clone(), message: err.to_string() });
                    }
                    // onError = continue: no output recorded for this node;
                    // downstream reads of its ports simply see `None`.
                }
            }
        }

        record.complete();
        self.persist_finish(&record).await;
        info!(execution_id = %record.id, "flow execution completed");
        Ok(record)
    }

    /// Flatten recorded upstream outputs into the `{port -> TagValue}` map a
    /// node's [`ExecutionContext`] expects, per its incoming edges.
    fn resolve_inputs(
        &self,
        flow: &FlowDocument,
        node_id: &str,
        node_outputs: &HashMap<String, NodeOutputRecord>,
    ) -> HashMap<String, nodes::TagValue> {
        let mut inputs = HashMap::new();
        for edge in flow.incoming_edges(node_id) {
            if let Some(output) = node_outputs.get(&edge.source_node_id) {
                inputs.insert(edge.target_port.clone(), output.tag_value.clone());
            }
        }
        inputs
    }

    async fn persist_start(&self, record: &ExecutionRecord) {
        let Some(pool) = &self.pool else { return };
        if let Err(err) =
            db::control::insert_flow_execution(pool, record.id, record.flow_id, record.trigger_node_id.as_deref(), record.started_at).await
        {
            warn!(error = %err, "failed to persist execution start, continuing");
        }
    }

    async fn persist_finish(&self, record: &ExecutionRecord) {
        let Some(pool) = &self.pool else { return };
        let status = match record.status {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Running => "running",
        };
        let node_outputs = serde_json::to_value(&record.node_outputs).unwrap_or(serde_json::Value::Null);
        let error_log = serde_json::to_value(&record.error_log).unwrap_or(serde_json::Value::Null);
        if let Err(err) =
            db::control::update_flow_execution(pool, record.id, status, record.completed_at, node_outputs, error_log).await
        {
            warn!(error = %err, "failed to persist execution result, continuing");
        }
    }

    async fn persist_tag_dependencies(&self, flow: &FlowDocument) {
        let Some(pool) = &self.pool else { return };
        let deps = tag_dependencies(flow);
        let rows: Vec<(Uuid, String, &'static str)> =
            deps.iter().map(|d| (d.tag_id, d.node_id.clone(), direction_str(d.direction))).collect();
        if let Err(err) = db::control::replace_flow_tag_dependencies(pool, flow.id, &rows).await {
            warn!(error = %err, "failed to persist tag dependencies, continuing");
        }
    }
}

fn direction_str(direction: TagDependencyDirection) -> &'static str {
    match direction {
        TagDependencyDirection::Read => "read",
        TagDependencyDirection::Write => "write",
    }
}

fn on_error_of(node: &crate::models::NodeInstance) -> OnError {
    node.data.get("onError").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default()
}

/// Scan `flow` for `tag-input`/`tag-output` nodes and derive one
/// `FlowTagDependency` row per `tagId` reference, recomputed at the start
/// of every invocation.
fn tag_dependencies(flow: &FlowDocument) -> Vec<FlowTagDependency> {
    flow.nodes
        .iter()
        .filter_map(|node| {
            let direction = match node.node_type.as_str() {
                "tag-input" => TagDependencyDirection::Read,
                "tag-output" => TagDependencyDirection::Write,
                _ => return None,
            };
            let tag_id = node.data.get("tagId").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok())?;
            Some(FlowTagDependency { flow_id: flow.id, tag_id, node_id: node.id.clone(), direction })
        })
        .collect()
}
