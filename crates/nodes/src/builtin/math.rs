//! The `Math` built-in node.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::formula;
use crate::context::ExecutionContext;
use crate::description::{NodeDescription, PortDescriptor, PropertyDescriptor, SemanticType};
use crate::error::NodeError;
use crate::tag::{TagData, TagValue};
use crate::traits::{ExecutableNode, NodeOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Average,
    Min,
    Max,
    Formula,
}

impl Operation {
    fn parse(raw: &str) -> Result<Self, NodeError> {
        match raw {
            "add" => Ok(Operation::Add),
            "subtract" => Ok(Operation::Subtract),
            "multiply" => Ok(Operation::Multiply),
            "divide" => Ok(Operation::Divide),
            "average" => Ok(Operation::Average),
            "min" => Ok(Operation::Min),
            "max" => Ok(Operation::Max),
            "formula" => Ok(Operation::Formula),
            other => Err(NodeError::TypeMismatch(format!("unknown Math operation '{other}'"))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
            Operation::Average => "average",
            Operation::Min => "min",
            Operation::Max => "max",
            Operation::Formula => "formula",
        }
    }
}

/// Stateless — every invocation reads its configuration fresh from
/// `ctx.params`, matching the other arithmetic/comparison built-ins.
pub struct MathNode;

fn coerce_numeric(data: &TagData, skip_invalid: bool) -> Result<Option<f64>, NodeError> {
    let as_json = data.to_json();
    if as_json.is_boolean() {
        return Err(NodeError::TypeMismatch(
            "Math does not accept boolean input; convert it first".to_string(),
        ));
    }
    if let Some(n) = data.as_f64() {
        return Ok(Some(n));
    }
    if skip_invalid {
        Ok(None)
    } else {
        Err(NodeError::TypeMismatch(format!("non-numeric input to Math: {as_json}")))
    }
}

fn round_to(value: f64, decimal_places: i32) -> f64 {
    if decimal_places < 0 {
        return value;
    }
    let factor = 10f64.powi(decimal_places);
    (value * factor).round() / factor
}

#[async_trait]
impl ExecutableNode for MathNode {
    fn description(&self) -> NodeDescription {
        NodeDescription {
            schema_version: 1,
            name: "math".to_string(),
            display_name: "Math".to_string(),
            version: "1.0.0".to_string(),
            category: "compute".to_string(),
            inputs: (1..=8)
                .map(|i| PortDescriptor {
                    name: format!("input{i}"),
                    semantic_type: SemanticType::Number,
                    required: i == 1,
                })
                .collect(),
            outputs: vec![PortDescriptor {
                name: "out".to_string(),
                semantic_type: SemanticType::Number,
                required: true,
            }],
            properties: vec![
                PropertyDescriptor {
                    name: "operation".to_string(),
                    value_type: "string".to_string(),
                    default: Some(json!("add")),
                    required: true,
                },
                PropertyDescriptor {
                    name: "decimalPlaces".to_string(),
                    value_type: "number".to_string(),
                    default: Some(json!(-1)),
                    required: false,
                },
                PropertyDescriptor {
                    name: "skipInvalid".to_string(),
                    value_type: "boolean".to_string(),
                    default: Some(json!(false)),
                    required: false,
                },
                PropertyDescriptor {
                    name: "formula".to_string(),
                    value_type: "string".to_string(),
                    default: None,
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
                .ok_or_else(|| NodeError::TypeMismatch("Math requires an 'operation'".to_string()))?,
        )?;
        let decimal_places = ctx
            .params
            .get("decimalPlaces")
            .and_then(Value::as_i64)
            .map_or(-1, |n| n as i32);
        let skip_invalid = ctx
            .params
            .get("skipInvalid")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut ports: Vec<&str> = ctx.input_ports();
        ports.sort_unstable();

        let mut qualities = Vec::with_capacity(ports.len());
        let mut raw_inputs = json!({});
        let mut numbers = Vec::with_capacity(ports.len());
        for port in &ports {
            let Some(tag_value) = ctx.get_input_value(port) else { continue };
            qualities.push(tag_value.quality);
            if let Some(obj) = raw_inputs.as_object_mut() {
                obj.insert((*port).to_string(), tag_value.value.to_json());
            }
            if let Some(n) = coerce_numeric(&tag_value.value, skip_invalid)? {
                numbers.push(n);
            }
        }

        let result = match operation {
            Operation::Add => numbers.iter().sum(),
            Operation::Multiply => numbers.iter().product(),
            Operation::Subtract => fold_left_from_first(&numbers, |a, b| a - b)?,
            Operation::Divide => fold_left_divide(&numbers)?,
            Operation::Average => {
                if numbers.is_empty() {
                    return Err(NodeError::TypeMismatch("Math average has no numeric inputs".to_string()));
                }
                numbers.iter().sum::<f64>() / numbers.len() as f64
            }
            Operation::Min => numbers
                .iter()
                .copied()
                .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.min(x))))
                .ok_or_else(|| NodeError::TypeMismatch("Math min has no numeric inputs".to_string()))?,
            Operation::Max => numbers
                .iter()
                .copied()
                .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))
                .ok_or_else(|| NodeError::TypeMismatch("Math max has no numeric inputs".to_string()))?,
            Operation::Formula => {
                let expr = ctx
                    .params
                    .get("formula")
                    .and_then(Value::as_str)
                    .ok_or_else(|| NodeError::TypeMismatch("Math formula operation requires a 'formula'".to_string()))?;
                formula::evaluate(expr, &numbers)?
            }
        };

        let rounded = round_to(result, decimal_places);
        let quality = quality::combine(&qualities);
        let tag_value = TagValue::new(TagData::Number(rounded), quality);

        Ok(NodeOutput::new(
            tag_value,
            operation.as_str(),
            raw_inputs,
            start.elapsed(),
        ))
    }
}

fn fold_left_from_first(numbers: &[f64], op: impl Fn(f64, f64) -> f64) -> Result<f64, NodeError> {
    let mut iter = numbers.iter().copied();
    let first = iter
        .next()
        .ok_or_else(|| NodeError::TypeMismatch("Math subtract has no numeric inputs".to_string()))?;
    Ok(iter.fold(first, op))
}

fn fold_left_divide(numbers: &[f64]) -> Result<f64, NodeError> {
    let mut iter = numbers.iter().copied();
    let mut acc = iter
        .next()
        .ok_or_else(|| NodeError::TypeMismatch("Math divide has no numeric inputs".to_string()))?;
    for n in iter {
        if n == 0.0 {
            return Err(NodeError::Fatal("Math divide by zero".to_string()));
        }
        acc /= n;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx_fixture as ctx_with;
    use std::collections::HashMap;

    #[tokio::test]
    async fn adds_inputs_and_rounds() {
        let mut inputs = HashMap::new();
        inputs.insert("input1".to_string(), TagValue::good(TagData::Number(1.2345)));
        inputs.insert("input2".to_string(), TagValue::good(TagData::Number(2.0)));
        let ctx = ctx_with(json!({"operation": "add", "decimalPlaces": 2}), inputs);
        let out = MathNode.execute(&ctx).await.unwrap();
        assert_eq!(out.tag_value.value.as_f64(), Some(3.23));
    }

    #[tokio::test]
    async fn divide_by_zero_is_fatal() {
        let mut inputs = HashMap::new();
        inputs.insert("input1".to_string(), TagValue::good(TagData::Number(10.0)));
        inputs.insert("input2".to_string(), TagValue::good(TagData::Number(0.0)));
        let ctx = ctx_with(json!({"operation": "divide"}), inputs);
        let err = MathNode.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }

    #[tokio::test]
    async fn boolean_input_is_rejected() {
        let mut inputs = HashMap::new();
        inputs.insert("input1".to_string(), TagValue::good(TagData::Structured(json!(true))));
        let ctx = ctx_with(json!({"operation": "add"}), inputs);
        let err = MathNode.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::TypeMismatch(_)));
    }

    #[tokio::test]
    async fn skip_invalid_omits_non_numeric() {
        let mut inputs = HashMap::new();
        inputs.insert("input1".to_string(), TagValue::good(TagData::Number(5.0)));
        inputs.insert("input2".to_string(), TagValue::good(TagData::Text("nope".to_string())));
        let ctx = ctx_with(json!({"operation": "add", "skipInvalid": true}), inputs);
        let out = MathNode.execute(&ctx).await.unwrap();
        assert_eq!(out.tag_value.value.as_f64(), Some(5.0));
    }

    #[tokio::test]
    async fn quality_is_the_worst_of_the_inputs() {
        let mut inputs = HashMap::new();
        inputs.insert("input1".to_string(), TagValue::good(TagData::Number(1.0)));
        inputs.insert("input2".to_string(), TagValue::new(TagData::Number(2.0), quality::Quality::UNCERTAIN));
        let ctx = ctx_with(json!({"operation": "add"}), inputs);
        let out = MathNode.execute(&ctx).await.unwrap();
        assert_eq!(out.tag_value.quality, quality::Quality::UNCERTAIN);
    }
}
