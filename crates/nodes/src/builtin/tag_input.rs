//! The `TagInput` built-in node.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::description::{NodeDescription, PortDescriptor, PropertyDescriptor, SemanticType};
use crate::error::NodeError;
use crate::tag::{DriverType, TagData, TagValue};
use crate::traits::{ExecutableNode, NodeOutput};

pub struct TagInputNode;

/// `-1` accepts any age; `0` means live-only with a 1 s tolerance; `N > 0`
/// requires the reading to be no older than `N` seconds.
fn age_is_acceptable(max_data_age: i64, value: &TagValue) -> bool {
    if max_data_age < 0 {
        return true;
    }
    let age_secs = (Utc::now() - value.timestamp).num_milliseconds() as f64 / 1000.0;
    let tolerance = if max_data_age == 0 { 1.0 } else { max_data_age as f64 };
    age_secs <= tolerance
}

#[async_trait]
impl ExecutableNode for TagInputNode {
    fn description(&self) -> NodeDescription {
        NodeDescription {
            schema_version: 1,
            name: "tag-input".to_string(),
            display_name: "Tag Input".to_string(),
            version: "1.0.0".to_string(),
            category: "io".to_string(),
            inputs: vec![],
            outputs: vec![PortDescriptor { name: "out".to_string(), semantic_type: SemanticType::Any, required: true }],
            properties: vec![
                PropertyDescriptor { name: "tagId".to_string(), value_type: "string".to_string(), default: None, required: true },
                PropertyDescriptor {
                    name: "maxDataAge".to_string(),
                    value_type: "number".to_string(),
                    default: Some(json!(-1)),
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
        let tag_id: Uuid = ctx
            .params
            .get("tagId")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::TypeMismatch("TagInput requires a 'tagId'".to_string()))?
            .parse()
            .map_err(|_| NodeError::TypeMismatch("tagId is not a valid UUID".to_string()))?;
        let max_data_age = ctx.params.get("maxDataAge").and_then(Value::as_i64).unwrap_or(-1);

        let rows = ctx
            .query(
                "SELECT driver_type FROM tag_metadata WHERE tag_id = $1",
                vec![json!(tag_id)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Err(NodeError::NotFound(format!("tag {tag_id} does not exist")));
        };
        let driver_type: DriverType = serde_json::from_value(
            row.get("driver_type").cloned().unwrap_or(json!("INTERNAL")),
        )
        .unwrap_or(DriverType::Internal);

        let from_cache = ctx.runtime_state().get_tag_value(tag_id);
        let resolved = match from_cache {
            Some(v) if age_is_acceptable(max_data_age, &v) => Some(v),
            _ => ctx.latest_tag_value(tag_id, driver_type).await?,
        };

        let output_value = match resolved {
            None => TagValue::null_bad(),
            Some(v) if !age_is_acceptable(max_data_age, &v) => TagValue::null_bad(),
            Some(v) => v,
        };

        Ok(NodeOutput::new(
            output_value,
            "tag-input",
            json!({"tagId": tag_id.to_string()}),
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_one_accepts_any_age() {
        let stale = TagValue::new(TagData::Number(1.0), quality::Quality::GOOD);
        assert!(age_is_acceptable(-1, &stale));
    }

    #[test]
    fn zero_requires_near_live_data() {
        let mut value = TagValue::good(TagData::Number(1.0));
        value.timestamp = Utc::now() - chrono::Duration::seconds(5);
        assert!(!age_is_acceptable(0, &value));
    }

    #[test]
    fn positive_bound_is_inclusive() {
        let mut value = TagValue::good(TagData::Number(1.0));
        value.timestamp = Utc::now() - chrono::Duration::seconds(10);
        assert!(age_is_acceptable(10, &value));
        assert!(!age_is_acceptable(5, &value));
    }
}
