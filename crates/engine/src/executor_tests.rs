//! Integration-style tests for [`crate::executor::Executor`] — end-to-end
//! flow scenarios exercised without a live Postgres instance (the executor
//! runs with `pool: None`, which keeps these tests isolated from the
//! database entirely).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use engine::executor::{Collaborators, Executor};
use engine::models::{Edge, ExecutionStatus, FlowDocument, NodeInstance};
use nodes::context::{ControlStore, Publisher, RuntimeCache, TimeSeriesStore};
use nodes::error::NodeError;
use nodes::tag::{DriverType, TagData, TagValue};
use registry::NodeRegistry;

/// Answers every `tag_metadata` lookup as an `INTERNAL` tag, so
/// `TagOutput`'s write-path check passes without a real database.
struct NullControl;
#[async_trait]
impl ControlStore for NullControl {
    async fn query(&self, _sql: &str, _params: Vec<serde_json::Value>) -> Result<Vec<serde_json::Value>, NodeError> {
        Ok(vec![json!({"driver_type": "INTERNAL"})])
    }
}

struct NullTsdb;
#[async_trait]
impl TimeSeriesStore for NullTsdb {
    async fn query(&self, _sql: &str, _params: Vec<serde_json::Value>) -> Result<Vec<serde_json::Value>, NodeError> {
        Ok(vec![])
    }
    async fn latest_tag_value(&self, _tag_id: Uuid, _driver_type: DriverType) -> Result<Option<TagValue>, NodeError> {
        Ok(None)
    }
    async fn history(&self, _tag_id: Uuid, _window_secs: i64) -> Result<Vec<TagValue>, NodeError> {
        Ok(vec![])
    }
}

struct NullBus;
#[async_trait]
impl Publisher for NullBus {
    async fn publish(&self, _subject: &str, _payload: serde_json::Value) -> Result<(), NodeError> {
        Ok(())
    }
}

struct NullCache;
impl RuntimeCache for NullCache {
    fn get_tag_value(&self, _tag_id: Uuid) -> Option<TagValue> {
        None
    }
    fn set_tag_value(&self, _tag_id: Uuid, _value: TagValue) {}
}

fn executor() -> Executor {
    let registry = Arc::new(NodeRegistry::new());
    registry::register_builtins(&registry);
    Executor::new(
        registry,
        Collaborators {
            control: Arc::new(NullControl),
            tsdb: Arc::new(NullTsdb),
            bus: Arc::new(NullBus),
            runtime_cache: Arc::new(NullCache),
        },
        None,
    )
}

fn node(id: &str, ty: &str, data: serde_json::Value) -> NodeInstance {
    NodeInstance { id: id.to_string(), node_type: ty.to_string(), data, position: serde_json::Value::Null }
}

fn edge(from: &str, from_port: &str, to: &str, to_port: &str) -> Edge {
    Edge { source_node_id: from.to_string(), source_port: from_port.to_string(), target_node_id: to.to_string(), target_port: to_port.to_string() }
}

/// `TagInput(A) -> Math(add) -> Math(divide by 2) -> TagOutput(B)`.
#[tokio::test]
async fn math_chain_end_to_end() {
    let mut flow = FlowDocument::new(
        "math-chain",
        vec![
            node("a", "tag-input", json!({"tagId": Uuid::new_v4()})),
            node("add", "math", json!({"operation": "add"})),
            node("half", "math", json!({"operation": "divide"})),
            node("b", "tag-output", json!({"tagId": Uuid::new_v4(), "connectionId": "conn-1", "writeStrategy": "always"})),
        ],
        vec![edge("a", "out", "add", "input1"), edge("add", "out", "half", "input1"), edge("half", "out", "b", "value")],
    );
    flow.pin_data.insert("a".to_string(), TagValue::good(TagData::Number(10.0)));
    flow.nodes.push(node("two", "tag-input", json!({"tagId": Uuid::new_v4()})));
    flow.edges.push(edge("two", "out", "half", "input2"));
    flow.pin_data.insert("two".to_string(), TagValue::good(TagData::Number(2.0)));

    let record = executor().run(&flow, None, Some("a".to_string())).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.node_outputs["half"].tag_value.value.as_f64(), Some(5.0));
}

/// A comparison gating a gate, single tick.
#[tokio::test]
async fn comparison_feeds_gate() {
    let flow = FlowDocument::new(
        "gate-scenario",
        vec![
            node("a", "tag-input", json!({"tagId": Uuid::new_v4()})),
            node("cmp", "comparison", json!({"operation": "gt"})),
            node("threshold", "tag-input", json!({"tagId": Uuid::new_v4()})),
            node("gate", "gate", json!({"falseOutputMode": "previous"})),
        ],
        vec![
            edge("a", "out", "cmp", "a"),
            edge("threshold", "out", "cmp", "b"),
            edge("cmp", "out", "gate", "condition"),
            edge("a", "out", "gate", "data"),
        ],
    );
    let mut flow = flow;
    flow.pin_data.insert("a".to_string(), TagValue::good(TagData::Number(20.0)));
    flow.pin_data.insert("threshold".to_string(), TagValue::good(TagData::Number(10.0)));

    let record = executor().run(&flow, None, None).await.unwrap();
    assert_eq!(record.node_outputs["cmp"].tag_value.value.to_json(), json!(true));
    assert_eq!(record.node_outputs["gate"].tag_value.value.as_f64(), Some(20.0));
}

#[tokio::test]
async fn unknown_node_type_is_a_fatal_executor_error() {
    let flow = FlowDocument::new("bad-type", vec![node("x", "does-not-exist", json!({}))], vec![]);
    let err = executor().run(&flow, None, None).await.unwrap_err();
    assert!(matches!(err, engine::error::EngineError::UnknownNodeType(ref t) if t == "does-not-exist"));
}

#[tokio::test]
async fn invalid_flow_is_rejected_before_any_node_runs() {
    let flow = FlowDocument::new("empty", vec![], vec![]);
    let err = executor().run(&flow, None, None).await.unwrap_err();
    assert!(matches!(err, engine::error::EngineError::Validation(_)));
}

/// Partial execution: only the requested subset runs, and nodes outside it
/// simply never appear in `node_outputs`.
#[tokio::test]
async fn partial_execution_only_runs_the_requested_subset() {
    let mut flow = FlowDocument::new(
        "partial",
        vec![node("a", "tag-input", json!({"tagId": Uuid::new_v4()})), node("unused", "tag-input", json!({"tagId": Uuid::new_v4()}))],
        vec![],
    );
    flow.pin_data.insert("a".to_string(), TagValue::good(TagData::Number(1.0)));
    flow.pin_data.insert("unused".to_string(), TagValue::good(TagData::Number(2.0)));

    let subset: std::collections::HashSet<String> = ["a".to_string()].into_iter().collect();
    let record = executor().run(&flow, Some(&subset), None).await.unwrap();
    assert!(record.node_outputs.contains_key("a"));
    assert!(!record.node_outputs.contains_key("unused"));
}
