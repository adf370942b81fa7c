//! The `Comparison` built-in node.

use std::time::Instant;

use async_trait::async_trait;
use quality::Quality;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::description::{NodeDescription, PortDescriptor, PropertyDescriptor, SemanticType};
use crate::error::NodeError;
use crate::tag::{TagData, TagValue};
use crate::traits::{ExecutableNode, NodeOutput};

#[derive(Debug, Clone, Copy)]
enum Operation {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
}

impl Operation {
    fn parse(raw: &str) -> Result<Self, NodeError> {
        match raw {
            "gt" => Ok(Operation::Gt),
            "lt" => Ok(Operation::Lt),
            "gte" => Ok(Operation::Gte),
            "lte" => Ok(Operation::Lte),
            "eq" => Ok(Operation::Eq),
            "neq" => Ok(Operation::Neq),
            other => Err(NodeError::TypeMismatch(format!("unknown Comparison operation '{other}'"))),
        }
    }
}

pub struct ComparisonNode;

/// `null → 0`; numbers pass through; numeric strings parse; everything else
/// fails to coerce.
fn coerce(data: &TagData) -> Option<f64> {
    match data {
        TagData::Null => Some(0.0),
        TagData::Number(n) => Some(*n),
        TagData::Text(s) => s.parse().ok(),
        TagData::Structured(v) => v.as_f64().or_else(|| v.as_bool().map(|b| if b { 1.0 } else { 0.0 })),
    }
}

#[async_trait]
impl ExecutableNode for ComparisonNode {
    fn description(&self) -> NodeDescription {
        NodeDescription {
            schema_version: 1,
            name: "comparison".to_string(),
            display_name: "Comparison".to_string(),
            version: "1.0.0".to_string(),
            category: "logic".to_string(),
            inputs: vec![
                PortDescriptor { name: "a".to_string(), semantic_type: SemanticType::Number, required: true },
                PortDescriptor { name: "b".to_string(), semantic_type: SemanticType::Number, required: true },
            ],
            outputs: vec![PortDescriptor { name: "out".to_string(), semantic_type: SemanticType::Boolean, required: true }],
            properties: vec![
                PropertyDescriptor {
                    name: "operation".to_string(),
                    value_type: "string".to_string(),
                    default: Some(json!("eq")),
                    required: true,
                },
                PropertyDescriptor {
                    name: "tolerance".to_string(),
                    value_type: "number".to_string(),
                    default: Some(json!(f64::EPSILON)),
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
        let operation = Operation::parse(
            ctx.params
                .get("operation")
                .and_then(Value::as_str)
                .ok_or_else(|| NodeError::TypeMismatch("Comparison requires an 'operation'".to_string()))?,
        )?;
        let tolerance = ctx
            .params
            .get("tolerance")
            .and_then(Value::as_f64)
            .unwrap_or(f64::EPSILON)
            .max(0.0);

        let a = ctx
            .get_input_value("a")
            .ok_or_else(|| NodeError::TypeMismatch("Comparison requires input 'a'".to_string()))?;
        let b = ctx
            .get_input_value("b")
            .ok_or_else(|| NodeError::TypeMismatch("Comparison requires input 'b'".to_string()))?;

        let inputs = json!({"a": a.value.to_json(), "b": b.value.to_json()});

        if a.quality.at_most_uncertain() || b.quality.at_most_uncertain() {
            return Ok(NodeOutput::new(
                TagValue::new(TagData::Structured(json!(false)), Quality::BAD),
                "comparison",
                inputs,
                start.elapsed(),
            ));
        }

        let (Some(av), Some(bv)) = (coerce(&a.value), coerce(&b.value)) else {
            let mut out = NodeOutput::new(
                TagValue::new(TagData::Structured(json!(false)), Quality::BAD),
                "comparison",
                inputs,
                start.elapsed(),
            );
            out.error = Some("non-numeric".to_string());
            return Ok(out);
        };

        let result = match operation {
            Operation::Gt => av > bv,
            Operation::Lt => av < bv,
            Operation::Gte => av >= bv,
            Operation::Lte => av <= bv,
            Operation::Eq => (av - bv).abs() < tolerance,
            Operation::Neq => (av - bv).abs() >= tolerance,
        };

        let quality = quality::combine(&[a.quality, b.quality]);
        Ok(NodeOutput::new(
            TagValue::new(TagData::Structured(json!(result)), quality),
            "comparison",
            inputs,
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx_fixture;
    use std::collections::HashMap;

    #[tokio::test]
    async fn gt_compares_numbers() {
        let mut inputs = HashMap::new();
        inputs.insert("a".to_string(), TagValue::good(TagData::Number(5.0)));
        inputs.insert("b".to_string(), TagValue::good(TagData::Number(3.0)));
        let ctx = ctx_fixture(json!({"operation": "gt"}), inputs);
        let out = ComparisonNode.execute(&ctx).await.unwrap();
        assert_eq!(out.tag_value.value.to_json(), json!(true));
        assert_eq!(out.tag_value.quality, Quality::GOOD);
    }

    #[tokio::test]
    async fn eq_respects_tolerance() {
        let mut inputs = HashMap::new();
        inputs.insert("a".to_string(), TagValue::good(TagData::Number(1.0)));
        inputs.insert("b".to_string(), TagValue::good(TagData::Number(1.0005)));
        let ctx = ctx_fixture(json!({"operation": "eq", "tolerance": 0.01}), inputs);
        let out = ComparisonNode.execute(&ctx).await.unwrap();
        assert_eq!(out.tag_value.value.to_json(), json!(true));
    }

    #[tokio::test]
    async fn non_numeric_operand_reports_bad_quality() {
        let mut inputs = HashMap::new();
        inputs.insert("a".to_string(), TagValue::good(TagData::Text("not-a-number".to_string())));
        inputs.insert("b".to_string(), TagValue::good(TagData::Number(1.0)));
        let ctx = ctx_fixture(json!({"operation": "eq"}), inputs);
        let out = ComparisonNode.execute(&ctx).await.unwrap();
        assert_eq!(out.tag_value.quality, Quality::BAD);
        assert_eq!(out.error.as_deref(), Some("non-numeric"));
    }

    #[tokio::test]
    async fn uncertain_quality_short_circuits_to_bad() {
        let mut inputs = HashMap::new();
        inputs.insert("a".to_string(), TagValue::new(TagData::Number(1.0), Quality::UNCERTAIN));
        inputs.insert("b".to_string(), TagValue::good(TagData::Number(1.0)));
        let ctx = ctx_fixture(json!({"operation": "eq"}), inputs);
        let out = ComparisonNode.execute(&ctx).await.unwrap();
        assert_eq!(out.tag_value.quality, Quality::BAD);
        assert_eq!(out.tag_value.value.to_json(), json!(false));
    }
}
