//! The `Gate` built-in node.
//!
//! Unlike `Math`/`Comparison`, `Gate` carries state: the last Good value
//! that passed through. The registry's `NodeFactory` mints one `GateNode`
//! per deployed node instance, so this state never leaks across flows or
//! between two Gates of the same flow.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::description::{NodeDescription, PortDescriptor, PropertyDescriptor, SemanticType};
use crate::error::NodeError;
use crate::tag::{TagData, TagValue};
use crate::traits::{ExecutableNode, NodeOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FalseOutputMode {
    Null,
    Previous,
}

impl FalseOutputMode {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("previous") => FalseOutputMode::Previous,
            _ => FalseOutputMode::Null,
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub struct GateNode {
    previous_good: Mutex<Option<TagValue>>,
}

impl GateNode {
    #[must_use]
    pub fn new() -> Self {
        Self { previous_good: Mutex::new(None) }
    }
}

impl Default for GateNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for GateNode {
    fn description(&self) -> NodeDescription {
        NodeDescription {
            schema_version: 1,
            name: "gate".to_string(),
            display_name: "Gate".to_string(),
            version: "1.0.0".to_string(),
            category: "logic".to_string(),
            inputs: vec![
                PortDescriptor { name: "condition".to_string(), semantic_type: SemanticType::Boolean, required: true },
                PortDescriptor { name: "data".to_string(), semantic_type: SemanticType::Any, required: true },
            ],
            outputs: vec![PortDescriptor { name: "out".to_string(), semantic_type: SemanticType::Any, required: true }],
            properties: vec![PropertyDescriptor {
                name: "falseOutputMode".to_string(),
                value_type: "string".to_string(),
                default: Some(json!("null")),
                required: false,
            }],
            io_rules: vec![],
            visual: None,
            config_ui: None,
        }
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let start = Instant::now();
        let mode = FalseOutputMode::parse(ctx.params.get("falseOutputMode").and_then(Value::as_str));

        let condition = ctx
            .get_input_value("condition")
            .ok_or_else(|| NodeError::TypeMismatch("Gate requires input 'condition'".to_string()))?;
        let data = ctx
            .get_input_value("data")
            .ok_or_else(|| NodeError::TypeMismatch("Gate requires input 'data'".to_string()))?;

        let inputs = json!({"condition": condition.value.to_json(), "data": data.value.to_json()});

        if truthy(&condition.value.to_json()) {
            if data.quality.is_good() {
                *self.previous_good.lock().expect("gate mutex poisoned") = Some(data.clone());
            }
            return Ok(NodeOutput::new(data.clone(), "gate", inputs, start.elapsed()));
        }

        let out_value = match mode {
            FalseOutputMode::Null => TagValue::null_bad(),
            FalseOutputMode::Previous => self
                .previous_good
                .lock()
                .expect("gate mutex poisoned")
                .clone()
                .unwrap_or_else(TagValue::null_bad),
        };

        Ok(NodeOutput::new(out_value, "gate", inputs, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx_fixture;
    use std::collections::HashMap;

    fn inputs(condition: Value, data: Value) -> HashMap<String, TagValue> {
        let mut m = HashMap::new();
        m.insert("condition".to_string(), TagValue::good(TagData::Structured(condition)));
        m.insert("data".to_string(), TagValue::good(TagData::Structured(data)));
        m
    }

    #[tokio::test]
    async fn passes_data_through_when_truthy() {
        let ctx = ctx_fixture(json!({}), inputs(json!(true), json!(42)));
        let out = GateNode::new().execute(&ctx).await.unwrap();
        assert_eq!(out.tag_value.value.to_json(), json!(42));
        assert!(out.tag_value.quality.is_good());
    }

    #[tokio::test]
    async fn falsy_with_null_mode_emits_bad_null() {
        let ctx = ctx_fixture(json!({"falseOutputMode": "null"}), inputs(json!(false), json!(42)));
        let out = GateNode::new().execute(&ctx).await.unwrap();
        assert!(out.tag_value.value.is_null());
        assert!(out.tag_value.quality.is_bad());
    }

    #[tokio::test]
    async fn falsy_with_previous_mode_replays_last_good_value() {
        let gate = GateNode::new();

        let open = ctx_fixture(json!({"falseOutputMode": "previous"}), inputs(json!(true), json!(7)));
        gate.execute(&open).await.unwrap();

        let closed = ctx_fixture(json!({"falseOutputMode": "previous"}), inputs(json!(false), json!(99)));
        let out = gate.execute(&closed).await.unwrap();
        assert_eq!(out.tag_value.value.to_json(), json!(7));
    }

    #[tokio::test]
    async fn previous_mode_with_no_prior_good_value_is_bad_null() {
        let gate = GateNode::new();
        let closed = ctx_fixture(json!({"falseOutputMode": "previous"}), inputs(json!(false), json!(99)));
        let out = gate.execute(&closed).await.unwrap();
        assert!(out.tag_value.value.is_null());
        assert!(out.tag_value.quality.is_bad());
    }
}
