//! Shared test fixtures for the built-in node unit tests.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::{ControlStore, ExecutionContext, ExecutionView, FlowView, Publisher, RuntimeCache, TimeSeriesStore};
use crate::error::NodeError;
use crate::tag::{DriverType, TagValue};

struct Unreachable;

#[async_trait]
impl ControlStore for Unreachable {
    async fn query(&self, _sql: &str, _params: Vec<Value>) -> Result<Vec<Value>, NodeError> {
        Ok(vec![])
    }
}

#[async_trait]
impl TimeSeriesStore for Unreachable {
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

#[async_trait]
impl Publisher for Unreachable {
    async fn publish(&self, _subject: &str, _payload: Value) -> Result<(), NodeError> {
        Ok(())
    }
}

impl RuntimeCache for Unreachable {
    fn get_tag_value(&self, _tag_id: Uuid) -> Option<TagValue> {
        None
    }
    fn set_tag_value(&self, _tag_id: Uuid, _value: TagValue) {}
}

/// A bare-bones `ExecutionContext` with no backing store — suitable for any
/// built-in node test that never touches `query`/`tsdb_query`/`publish`.
pub fn ctx_fixture(params: Value, inputs: HashMap<String, TagValue>) -> ExecutionContext {
    ExecutionContext::new(
        FlowView { flow_id: Uuid::new_v4(), static_data: json!({}) },
        ExecutionView { execution_id: Uuid::new_v4(), trigger_node_id: None },
        "n1",
        "test",
        params,
        inputs,
        Arc::new(Unreachable),
        Arc::new(Unreachable),
        Arc::new(Unreachable),
        Arc::new(Unreachable),
    )
}
