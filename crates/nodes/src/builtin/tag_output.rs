//! The `TagOutput` built-in node.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use quality::Quality;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::description::{NodeDescription, PortDescriptor, PropertyDescriptor, SemanticType};
use crate::error::NodeError;
use crate::tag::{DriverType, TagData, TagValue};
use crate::traits::{writable, ExecutableNode, NodeOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteStrategy {
    Always,
    OnChange,
    Never,
}

impl WriteStrategy {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("always") => WriteStrategy::Always,
            Some("never") => WriteStrategy::Never,
            _ => WriteStrategy::OnChange,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Deadband {
    Absolute(f64),
    Percent(f64),
    None,
}

impl Deadband {
    fn parse(params: &Value) -> Self {
        let Some(delta) = params.get("deadband").and_then(Value::as_f64) else {
            return Deadband::None;
        };
        if params.get("deadbandMode").and_then(Value::as_str) == Some("percent") {
            Deadband::Percent(delta)
        } else {
            Deadband::Absolute(delta)
        }
    }

    fn exceeded(self, old: f64, new: f64) -> bool {
        match self {
            Deadband::None => true,
            Deadband::Absolute(delta) => (new - old).abs() >= delta,
            Deadband::Percent(delta) => {
                if old == 0.0 {
                    true
                } else {
                    ((new - old).abs() / old.abs()) * 100.0 >= delta
                }
            }
        }
    }
}

struct LastWrite {
    value: TagValue,
    at: Instant,
}

/// Carries per-instance state (the last written value/time), so one
/// `TagOutputNode` must be minted per deployed node the same way `Gate` is.
pub struct TagOutputNode {
    last: Mutex<Option<LastWrite>>,
}

impl TagOutputNode {
    #[must_use]
    pub fn new() -> Self {
        Self { last: Mutex::new(None) }
    }
}

impl Default for TagOutputNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for TagOutputNode {
    fn description(&self) -> NodeDescription {
        NodeDescription {
            schema_version: 1,
            name: "tag-output".to_string(),
            display_name: "Tag Output".to_string(),
            version: "1.0.0".to_string(),
            category: "io".to_string(),
            inputs: vec![PortDescriptor { name: "value".to_string(), semantic_type: SemanticType::Any, required: true }],
            outputs: vec![PortDescriptor { name: "out".to_string(), semantic_type: SemanticType::Any, required: true }],
            properties: vec![
                PropertyDescriptor { name: "tagId".to_string(), value_type: "string".to_string(), default: None, required: true },
                PropertyDescriptor { name: "connectionId".to_string(), value_type: "string".to_string(), default: None, required: true },
                PropertyDescriptor {
                    name: "writeStrategy".to_string(),
                    value_type: "string".to_string(),
                    default: Some(json!("on-change")),
                    required: false,
                },
                PropertyDescriptor { name: "deadband".to_string(), value_type: "number".to_string(), default: None, required: false },
                PropertyDescriptor {
                    name: "deadbandMode".to_string(),
                    value_type: "string".to_string(),
                    default: Some(json!("absolute")),
                    required: false,
                },
                PropertyDescriptor {
                    name: "heartbeatIntervalSecs".to_string(),
                    value_type: "number".to_string(),
                    default: None,
                    required: false,
                },
                PropertyDescriptor {
                    name: "testDisableWrites".to_string(),
                    value_type: "boolean".to_string(),
                    default: Some(json!(false)),
                    required: false,
                },
            ],
            io_rules: vec![],
            visual: None,
            config_ui: None,
        }
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let start = Instant::now();
        let value = ctx
            .get_input_value("value")
            .ok_or_else(|| NodeError::TypeMismatch("TagOutput requires input 'value'".to_string()))?
            .clone();

        let tag_id: Uuid = ctx
            .params
            .get("tagId")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::TypeMismatch("TagOutput requires a 'tagId'".to_string()))?
            .parse()
            .map_err(|_| NodeError::TypeMismatch("tagId is not a valid UUID".to_string()))?;
        let connection_id: Uuid = ctx
            .params
            .get("connectionId")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::TypeMismatch("TagOutput requires a 'connectionId'".to_string()))?
            .parse()
            .map_err(|_| NodeError::TypeMismatch("connectionId is not a valid UUID".to_string()))?;
        let strategy = WriteStrategy::parse(ctx.params.get("writeStrategy").and_then(Value::as_str));
        let deadband = Deadband::parse(&ctx.params);
        let heartbeat = ctx
            .params
            .get("heartbeatIntervalSecs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs);
        let test_disable_writes = ctx
            .params
            .get("testDisableWrites")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let should_write = {
            let last = self.last.lock().expect("tag-output mutex poisoned");
            decide(strategy, deadband, heartbeat, last.as_ref(), &value)
        };

        if should_write && !test_disable_writes {
            self.write(ctx, tag_id, connection_id, &value).await?;
        }
        if should_write {
            *self.last.lock().expect("tag-output mutex poisoned") =
                Some(LastWrite { value: value.clone(), at: Instant::now() });
        }

        Ok(NodeOutput::new(
            value.clone(),
            "tag-output",
            json!({"value": value.value.to_json(), "wrote": should_write}),
            start.elapsed(),
        ))
    }
}

fn decide(
    strategy: WriteStrategy,
    deadband: Deadband,
    heartbeat: Option<Duration>,
    last: Option<&LastWrite>,
    new: &TagValue,
) -> bool {
    if strategy == WriteStrategy::Never {
        return false;
    }
    let Some(last) = last else { return true };

    if last.value.quality != new.quality {
        return true;
    }
    if let Some(interval) = heartbeat {
        if last.at.elapsed() >= interval {
            return true;
        }
    }
    if strategy == WriteStrategy::Always {
        return true;
    }

    match (last.value.value.as_f64(), new.value.as_f64()) {
        (Some(old), Some(new)) => deadband.exceeded(old, new),
        _ => last.value.value.to_json() != new.value.to_json(),
    }
}

impl TagOutputNode {
    async fn write(
        &self,
        ctx: &ExecutionContext,
        tag_id: Uuid,
        connection_id: Uuid,
        value: &TagValue,
    ) -> Result<(), NodeError> {
        let rows = ctx
            .query("SELECT driver_type FROM tag_metadata WHERE tag_id = $1", vec![json!(tag_id)])
            .await?;
        let Some(row) = rows.first() else {
            return Err(NodeError::NotFound(format!("tag {tag_id} does not exist")));
        };
        let driver_type: DriverType = serde_json::from_value(
            row.get("driver_type").cloned().unwrap_or(json!("INTERNAL")),
        )
        .unwrap_or(DriverType::Internal);
        if !writable(driver_type) {
            return Err(NodeError::TypeMismatch(format!(
                "tag {tag_id} is {driver_type:?}, only INTERNAL tags may be written by the engine"
            )));
        }

        ctx.runtime_state().set_tag_value(tag_id, value.clone());
        let ts = Utc::now();
        let _ = ctx
            .tsdb_query(
                "INSERT INTO tag_values (ts, connection_id, tag_id, quality, v_num, v_text, v_json) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                vec![
                    json!(ts),
                    json!(connection_id),
                    json!(tag_id),
                    json!(value.quality.0),
                    value.value.as_f64().map_or(Value::Null, |n| json!(n)),
                    match &value.value {
                        TagData::Text(s) => json!(s),
                        _ => Value::Null,
                    },
                    match &value.value {
                        TagData::Number(_) | TagData::Text(_) => Value::Null,
                        other => other.to_json(),
                    },
                ],
            )
            .await;
        ctx.publish_to_nats(
            &format!("telemetry.raw.{connection_id}"),
            json!({
                "connection_id": connection_id,
                "tag_id": tag_id,
                "ts": ts,
                "v": value.value.to_json(),
                "q": value.quality.0,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::context::{ExecutionContext, ExecutionView, FlowView, RuntimeCache, TimeSeriesStore};

    use super::*;

    fn reading(v: f64, q: Quality) -> TagValue {
        TagValue::new(TagData::Number(v), q)
    }

    struct FixedDriverControl(&'static str);

    #[async_trait]
    impl crate::context::ControlStore for FixedDriverControl {
        async fn query(&self, _sql: &str, _params: Vec<Value>) -> Result<Vec<Value>, NodeError> {
            Ok(vec![json!({"driver_type": self.0})])
        }
    }

    struct NullTsdb;

    #[async_trait]
    impl TimeSeriesStore for NullTsdb {
        async fn query(&self, _sql: &str, _params: Vec<Value>) -> Result<Vec<Value>, NodeError> {
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
    impl crate::context::Publisher for NullBus {
        async fn publish(&self, _subject: &str, _payload: Value) -> Result<(), NodeError> {
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

    fn ctx_with_driver_type(driver_type: &'static str, params: Value) -> ExecutionContext {
        ExecutionContext::new(
            FlowView { flow_id: Uuid::new_v4(), static_data: json!({}) },
            ExecutionView { execution_id: Uuid::new_v4(), trigger_node_id: None },
            "n1",
            "tag-output",
            params,
            HashMap::from([("value".to_string(), reading(1.0, Quality::GOOD))]),
            std::sync::Arc::new(FixedDriverControl(driver_type)),
            std::sync::Arc::new(NullTsdb),
            std::sync::Arc::new(NullBus),
            std::sync::Arc::new(NullCache),
        )
    }

    #[tokio::test]
    async fn write_to_internal_tag_succeeds() {
        let ctx = ctx_with_driver_type(
            "INTERNAL",
            json!({"tagId": Uuid::new_v4(), "connectionId": Uuid::new_v4(), "writeStrategy": "always"}),
        );
        let node = TagOutputNode::new();
        let output = node.execute(&ctx).await.unwrap();
        assert_eq!(output.inputs["wrote"], json!(true));
    }

    #[tokio::test]
    async fn write_to_non_internal_tag_is_rejected() {
        let ctx = ctx_with_driver_type(
            "OPCUA",
            json!({"tagId": Uuid::new_v4(), "connectionId": Uuid::new_v4(), "writeStrategy": "always"}),
        );
        let node = TagOutputNode::new();
        let err = node.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::TypeMismatch(_)));
    }

    #[test]
    fn never_strategy_always_declines() {
        assert!(!decide(WriteStrategy::Never, Deadband::None, None, None, &reading(1.0, Quality::GOOD)));
    }

    #[test]
    fn first_write_always_happens() {
        assert!(decide(WriteStrategy::OnChange, Deadband::None, None, None, &reading(1.0, Quality::GOOD)));
    }

    #[test]
    fn on_change_respects_deadband() {
        let last = LastWrite { value: reading(10.0, Quality::GOOD), at: Instant::now() };
        assert!(!decide(WriteStrategy::OnChange, Deadband::Absolute(1.0), None, Some(&last), &reading(10.5, Quality::GOOD)));
        assert!(decide(WriteStrategy::OnChange, Deadband::Absolute(1.0), None, Some(&last), &reading(11.5, Quality::GOOD)));
    }

    #[test]
    fn quality_change_always_forces_a_write() {
        let last = LastWrite { value: reading(10.0, Quality::GOOD), at: Instant::now() };
        assert!(decide(WriteStrategy::OnChange, Deadband::Absolute(100.0), None, Some(&last), &reading(10.0, Quality::BAD)));
    }
}
