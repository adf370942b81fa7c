//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::description::{NodeDescription, PortDescriptor, SemanticType};
use crate::error::NodeError;
use crate::tag::{TagData, TagValue};
use crate::traits::{ExecutableNode, NodeOutput};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Transient` error.
    FailTransient(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions and folded into the returned output.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Every `ExecutionContext::params` seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReturnValue(value),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailFatal(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with a `Transient` error.
    pub fn failing_transient(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailTransient(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock mutex poisoned").len()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    fn description(&self) -> NodeDescription {
        NodeDescription {
            schema_version: 1,
            name: "mock".to_string(),
            display_name: "Mock".to_string(),
            version: "1.0.0".to_string(),
            category: "test".to_string(),
            inputs: vec![PortDescriptor {
                name: "in".to_string(),
                semantic_type: SemanticType::Any,
                required: false,
            }],
            outputs: vec![PortDescriptor {
                name: "out".to_string(),
                semantic_type: SemanticType::Any,
                required: true,
            }],
            properties: vec![],
            io_rules: vec![],
            visual: None,
            config_ui: None,
        }
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        self.calls
            .lock()
            .expect("mock mutex poisoned")
            .push(ctx.params.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                let mut out = json!({ "node": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                let tag_value = TagValue::good(TagData::Structured(out.clone()));
                Ok(NodeOutput::new(tag_value, "mock", out, Duration::from_millis(0)))
            }
            MockBehaviour::FailTransient(msg) => Err(NodeError::Transient(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
        }
    }
}
