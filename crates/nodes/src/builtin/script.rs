//! The `Script` built-in node.
//!
//! Bridges [`ExecutionContext`] into the `sandbox` crate's capability
//! traits. The adapters below are synchronous (as `sandbox::capability`
//! requires) but the work they do is async, so each uses
//! `tokio::task::block_in_place` to step outside the async executor before
//! blocking on the result. That is safe here because the sandbox always
//! evaluates scripts inside `tokio::task::spawn_blocking`, never on a
//! reactor thread — see `sandbox::ScriptSandbox::run`. It does require a
//! multi-threaded Tokio runtime, which `engine`'s runtime already is.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use sandbox::capability::{FlowState, TagReader};
use sandbox::{FsCapability, SandboxCapabilities, ScriptSandbox, TagReading};
use serde_json::{json, Value};

use crate::context::{ControlStore, ExecutionContext, TimeSeriesStore};
use crate::description::{NodeDescription, PortDescriptor, PropertyDescriptor, SemanticType};
use crate::error::NodeError;
use crate::tag::{DriverType, TagData, TagValue};
use crate::traits::{ExecutableNode, NodeOutput};

/// Resolves `$tags.get("path")`/`history` by looking the path up in
/// `tag_metadata` and then reading through the same control/tsdb handles
/// the rest of the node set uses.
struct ContextTagReader {
    control: Arc<dyn ControlStore>,
    tsdb: Arc<dyn TimeSeriesStore>,
}

impl ContextTagReader {
    fn resolve(&self, path: &str) -> Option<(uuid::Uuid, DriverType)> {
        let rows = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.control.query(
                "SELECT tag_id, driver_type FROM tag_metadata WHERE tag_path = $1",
                vec![json!(path)],
            ))
        })
        .ok()?;
        let row = rows.first()?;
        let tag_id: uuid::Uuid = serde_json::from_value(row.get("tag_id")?.clone()).ok()?;
        let driver_type: DriverType = serde_json::from_value(row.get("driver_type")?.clone()).ok()?;
        Some((tag_id, driver_type))
    }
}

impl TagReader for ContextTagReader {
    fn get(&self, path: &str) -> Option<TagReading> {
        let (tag_id, driver_type) = self.resolve(path)?;
        let tsdb = self.tsdb.clone();
        let value = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(tsdb.latest_tag_value(tag_id, driver_type))
        })
        .ok()??;
        Some(TagReading { value: value.value.to_json(), quality: value.quality, timestamp: value.timestamp })
    }

    fn history(&self, path: &str, window_secs: i64) -> Vec<TagReading> {
        let Some((tag_id, _)) = self.resolve(path) else { return Vec::new() };
        let tsdb = self.tsdb.clone();
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(tsdb.history(tag_id, window_secs)))
            .unwrap_or_default()
            .into_iter()
            .map(|v| TagReading { value: v.value.to_json(), quality: v.quality, timestamp: v.timestamp })
            .collect()
    }
}

/// A script-invocation-scoped view of the flow's `staticData`. Mutations
/// are visible to later `flow_state::get` calls within the same script run
/// but, as with the rest of the single-shot execution model, are not
/// persisted back to the flow document — `engine` decides whether to fold
/// script-produced state back into `staticData` between invocations.
struct ScopedFlowState(RwLock<Value>);

impl FlowState for ScopedFlowState {
    fn get(&self, key: &str) -> Option<Value> {
        self.0.read().expect("flow state lock poisoned").get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut guard = self.0.write().expect("flow state lock poisoned");
        if let Some(obj) = guard.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
    }
}

pub struct ScriptNode {
    logs: Mutex<Vec<String>>,
}

impl ScriptNode {
    #[must_use]
    pub fn new() -> Self {
        Self { logs: Mutex::new(Vec::new()) }
    }
}

impl Default for ScriptNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for ScriptNode {
    fn description(&self) -> NodeDescription {
        NodeDescription {
            schema_version: 1,
            name: "script".to_string(),
            display_name: "Script".to_string(),
            version: "1.0.0".to_string(),
            category: "compute".to_string(),
            inputs: vec![PortDescriptor { name: "input".to_string(), semantic_type: SemanticType::Any, required: false }],
            outputs: vec![PortDescriptor { name: "out".to_string(), semantic_type: SemanticType::Any, required: true }],
            properties: vec![
                PropertyDescriptor { name: "source".to_string(), value_type: "string".to_string(), default: None, required: true },
                PropertyDescriptor {
                    name: "timeoutMs".to_string(),
                    value_type: "number".to_string(),
                    default: Some(json!(5_000)),
                    required: false,
                },
                PropertyDescriptor {
                    name: "allowedPaths".to_string(),
                    value_type: "array".to_string(),
                    default: Some(json!([])),
                    required: false,
                },
            ],
            io_rules: vec![],
            visual: None,
            config_ui: None,
        }
    }

    fn log_messages(&self) -> Vec<String> {
        self.logs.lock().expect("script log mutex poisoned").clone()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let start = Instant::now();
        let source = ctx
            .params
            .get("source")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::TypeMismatch("Script requires a 'source'".to_string()))?
            .to_string();
        let timeout_ms = ctx.params.get("timeoutMs").and_then(Value::as_u64).unwrap_or(5_000);
        let allowed_paths: Vec<PathBuf> = ctx
            .params
            .get("allowedPaths")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(PathBuf::from).collect())
            .unwrap_or_default();

        let input = {
            let mut obj = serde_json::Map::new();
            for port in ctx.input_ports() {
                if let Some(v) = ctx.get_input_value(port) {
                    obj.insert(port.to_string(), v.value.to_json());
                }
            }
            Value::Object(obj)
        };

        let capabilities = SandboxCapabilities {
            tags: Arc::new(ContextTagReader { control: ctx.control_handle(), tsdb: ctx.tsdb_handle() }),
            flow_state: Arc::new(ScopedFlowState(RwLock::new(ctx.flow.static_data.clone()))),
            fs: if allowed_paths.is_empty() { FsCapability::denied() } else { FsCapability::new(allowed_paths) },
        };

        let sandbox = ScriptSandbox::new(capabilities, timeout_ms);
        let outcome = sandbox
            .run(input.clone(), source)
            .await
            .map_err(|e| NodeError::Fatal(format!("sandbox failure: {e}")))?;

        *self.logs.lock().expect("script log mutex poisoned") = outcome.logs;

        if let Some(err) = outcome.error {
            return Err(NodeError::Fatal(format!("{}: {}", err.name, err.message)));
        }

        let (value, quality) = quality::extract(&outcome.result);
        let tag_value = TagValue::new(
            if value.is_null() { TagData::Null } else { TagData::Structured(value) },
            quality,
        );
        Ok(NodeOutput::new(tag_value, "script", json!({"input": input, "timestamp": Utc::now()}), start.elapsed()))
    }
}
