//! `sandbox` crate — bounded execution of user-supplied scripts.
//!
//! [`ScriptSandbox`] evaluates a script inside a sealed [`rhai`] scope that
//! exposes only `$input`, `$tags`, `$flow`, `$fs`, a captured `console`, and
//! a small set of safe standard helpers. Everything else — module loading,
//! process control, global scope access, timers, native buffers — is
//! unreachable because [`rhai::Engine::new_raw`] registers none of it and
//! this module never adds it back.

pub mod capability;
pub mod error;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde::{Deserialize, Serialize};

pub use capability::{FsCapability, SandboxCapabilities, TagReading};
pub use error::SandboxError;

/// Structured error returned inside a [`ScriptOutcome`] when the script
/// itself fails (as opposed to [`SandboxError`], which means the sandbox
/// could not run the script at all).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptError {
    pub message: String,
    pub stack: String,
    pub name: String,
}

/// The result of one script evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub result: serde_json::Value,
    pub logs: Vec<String>,
    pub error: Option<ScriptError>,
}

impl ScriptOutcome {
    fn failed(name: &str, message: impl Into<String>, logs: Vec<String>) -> Self {
        let message = message.into();
        Self {
            result: serde_json::Value::Null,
            logs,
            error: Some(ScriptError {
                message: message.clone(),
                stack: message,
                name: name.to_string(),
            }),
        }
    }
}

/// The minimum slack granted past the configured timeout before a script is
/// forcibly reported as timed out; matches the "fixed slack (e.g. 50 ms)"
/// testable property.
const TIMEOUT_SLACK: Duration = Duration::from_millis(50);

/// How often (in rhai operations) the wall-clock deadline is checked.
const PROGRESS_CHECK_EVERY: u64 = 256;

/// Bounded script evaluator for a single node invocation.
pub struct ScriptSandbox {
    capabilities: SandboxCapabilities,
    timeout: Duration,
}

impl ScriptSandbox {
    /// `timeout_ms` is clamped to `[0, 60_000]`.
    #[must_use]
    pub fn new(capabilities: SandboxCapabilities, timeout_ms: u64) -> Self {
        let clamped = timeout_ms.min(60_000);
        Self {
            capabilities,
            timeout: Duration::from_millis(clamped),
        }
    }

    /// Evaluate `source` with `$input` bound to `input`.
    ///
    /// Never returns `Err` for script failures — those are reported inside
    /// [`ScriptOutcome::error`]. An `Err` here means the sandbox's own
    /// plumbing failed (the blocking task panicked).
    pub async fn run(
        &self,
        input: serde_json::Value,
        source: String,
    ) -> Result<ScriptOutcome, SandboxError> {
        let capabilities = self.capabilities.clone();
        let timeout = self.timeout;
        let handle = tokio::task::spawn_blocking(move || {
            Self::eval_blocking(&capabilities, input, &source, timeout)
        });

        match tokio::time::timeout(timeout + TIMEOUT_SLACK, handle).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(join_err)) => Err(SandboxError::TaskPanicked(join_err.to_string())),
            Err(_elapsed) => Ok(ScriptOutcome::failed("Timeout", "script exceeded its wall-time bound", Vec::new())),
        }
    }

    fn eval_blocking(
        capabilities: &SandboxCapabilities,
        input: serde_json::Value,
        source: &str,
        timeout: Duration,
    ) -> ScriptOutcome {
        let logs: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let deadline = Instant::now() + timeout;

        let mut engine = Engine::new_raw();
        engine.set_max_operations(50_000_000);
        engine.set_max_expr_depths(64, 64);
        engine.on_progress(move |count| {
            if count % PROGRESS_CHECK_EVERY == 0 && Instant::now() >= deadline {
                Some(Dynamic::from("__sandbox_timeout__"))
            } else {
                None
            }
        });

        register_console(&mut engine, logs.clone());
        register_math_helpers(&mut engine);
        register_tags(&mut engine, capabilities.tags.clone());
        register_flow_state(&mut engine, capabilities.flow_state.clone());
        register_fs(&mut engine, capabilities.fs.clone());

        let mut scope = Scope::new();
        let input_dynamic = rhai::serde::to_dynamic(&input).unwrap_or(Dynamic::UNIT);
        scope.push_constant("input", input_dynamic);

        let wrapped = format!("fn __sandbox_entry(input) {{\n{source}\n}}\n__sandbox_entry(input)");

        match engine.eval_with_scope::<Dynamic>(&mut scope, &wrapped) {
            Ok(value) => {
                let result = rhai::serde::from_dynamic(&value).unwrap_or(serde_json::Value::Null);
                ScriptOutcome {
                    result,
                    logs: take_logs(&logs),
                    error: None,
                }
            }
            Err(err) => Self::classify_error(*err, &logs),
        }
    }

    fn classify_error(err: EvalAltResult, logs: &Arc<Mutex<Vec<String>>>) -> ScriptOutcome {
        let collected = take_logs(logs);
        if let EvalAltResult::ErrorTerminated(ref reason, _) = err {
            if reason.to_string().contains("__sandbox_timeout__") {
                return ScriptOutcome::failed("Timeout", "script exceeded its wall-time bound", collected);
            }
        }
        ScriptOutcome::failed("ScriptError", err.to_string(), collected)
    }
}

fn take_logs(logs: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    std::mem::take(&mut *logs.lock().expect("log mutex poisoned"))
}

fn register_console(engine: &mut Engine, logs: Arc<Mutex<Vec<String>>>) {
    let mut module = rhai::Module::new();
    for level in ["log", "info", "warn", "error"] {
        let logs = logs.clone();
        let level = level.to_string();
        module.set_native_fn(&level.clone(), move |message: &str| {
            logs.lock().expect("log mutex poisoned").push(format!("[{level}] {message}"));
            Ok(())
        });
    }
    engine.register_static_module("console", module.into());
}

fn register_math_helpers(engine: &mut Engine) {
    engine.register_fn("sqrt", |x: f64| x.sqrt());
    engine.register_fn("abs", |x: f64| x.abs());
    engine.register_fn("round", |x: f64| x.round());
    engine.register_fn("floor", |x: f64| x.floor());
    engine.register_fn("ceil", |x: f64| x.ceil());
    engine.register_fn("pow", |x: f64, y: f64| x.powf(y));
    engine.register_fn("min", |x: f64, y: f64| x.min(y));
    engine.register_fn("max", |x: f64, y: f64| x.max(y));
    engine.register_fn("now_ms", || chrono::Utc::now().timestamp_millis());
    engine.register_fn("json_parse", |text: &str| -> String {
        serde_json::from_str::<serde_json::Value>(text)
            .map(|v| v.to_string())
            .unwrap_or_default()
    });
}

fn register_tags(engine: &mut Engine, tags: Arc<dyn capability::TagReader>) {
    let mut module = rhai::Module::new();
    {
        let tags = tags.clone();
        module.set_native_fn("get", move |path: &str| {
            let reading = tags.get(path).map(|r| {
                rhai::Map::from_iter([
                    ("value".into(), rhai::serde::to_dynamic(&r.value).unwrap_or(Dynamic::UNIT)),
                    ("quality".into(), Dynamic::from(i64::from(r.quality.0))),
                    ("timestamp".into(), Dynamic::from(r.timestamp.to_rfc3339())),
                ])
            });
            Ok(reading.map_or(Dynamic::UNIT, Dynamic::from))
        });
    }
    module.set_native_fn("history", move |path: &str, window_secs: i64| {
        let readings = tags.history(path, window_secs);
        let arr: rhai::Array = readings
            .into_iter()
            .map(|r| {
                Dynamic::from(rhai::Map::from_iter([
                    ("value".into(), rhai::serde::to_dynamic(&r.value).unwrap_or(Dynamic::UNIT)),
                    ("quality".into(), Dynamic::from(i64::from(r.quality.0))),
                    ("timestamp".into(), Dynamic::from(r.timestamp.to_rfc3339())),
                ]))
            })
            .collect();
        Ok(arr)
    });
    engine.register_static_module("tags", module.into());
}

fn register_flow_state(engine: &mut Engine, state: Arc<dyn capability::FlowState>) {
    let mut module = rhai::Module::new();
    {
        let state = state.clone();
        module.set_native_fn("get", move |key: &str| {
            Ok(state
                .get(key)
                .map(|v| rhai::serde::to_dynamic(&v).unwrap_or(Dynamic::UNIT))
                .unwrap_or(Dynamic::UNIT))
        });
    }
    module.set_native_fn("set", move |key: &str, value: Dynamic| {
        let json = rhai::serde::from_dynamic(&value).unwrap_or(serde_json::Value::Null);
        state.set(key, json);
        Ok(())
    });
    engine.register_static_module("flow_state", module.into());
}

fn register_fs(engine: &mut Engine, fs: FsCapability) {
    let mut module = rhai::Module::new();
    {
        let fs = fs.clone();
        module.set_native_fn("read_file", move |path: &str| {
            fs.read_file(path)
                .map_err(|e| format!("fs.readFile: {e}").into())
        });
    }
    {
        let fs = fs.clone();
        module.set_native_fn("write_file", move |path: &str, contents: &str| {
            fs.write_file(path, contents)
                .map(|()| true)
                .map_err(|e| format!("fs.writeFile: {e}").into())
        });
    }
    {
        let fs = fs.clone();
        module.set_native_fn("exists", move |path: &str| Ok(fs.exists(path)));
    }
    module.set_native_fn("read_dir", move |path: &str| {
        let entries = fs.read_dir(path).map_err(|e| format!("fs.readdir: {e}"))?;
        let arr: rhai::Array = entries.into_iter().map(Dynamic::from).collect();
        Ok(arr)
    });
    engine.register_static_module("fs", module.into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use capability::{FlowState, TagReader};
    use std::collections::HashMap;
    use std::sync::RwLock;

    struct NoTags;
    impl TagReader for NoTags {
        fn get(&self, _path: &str) -> Option<TagReading> {
            None
        }
        fn history(&self, _path: &str, _window_secs: i64) -> Vec<TagReading> {
            Vec::new()
        }
    }

    struct MemFlowState(RwLock<HashMap<String, serde_json::Value>>);
    impl FlowState for MemFlowState {
        fn get(&self, key: &str) -> Option<serde_json::Value> {
            self.0.read().unwrap().get(key).cloned()
        }
        fn set(&self, key: &str, value: serde_json::Value) {
            self.0.write().unwrap().insert(key.to_string(), value);
        }
    }

    fn caps() -> SandboxCapabilities {
        SandboxCapabilities {
            tags: Arc::new(NoTags),
            flow_state: Arc::new(MemFlowState(RwLock::new(HashMap::new()))),
            fs: FsCapability::denied(),
        }
    }

    #[tokio::test]
    async fn returns_input_plus_one() {
        let sandbox = ScriptSandbox::new(caps(), 1_000);
        let outcome = sandbox
            .run(serde_json::json!(41), "return input + 1;".to_string())
            .await
            .expect("sandbox should run");
        assert_eq!(outcome.result, serde_json::json!(42));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn console_log_is_captured_not_printed() {
        let sandbox = ScriptSandbox::new(caps(), 1_000);
        let outcome = sandbox
            .run(serde_json::json!(null), "console::log(\"hi\"); return 1;".to_string())
            .await
            .expect("sandbox should run");
        assert_eq!(outcome.logs, vec!["[log] hi".to_string()]);
    }

    #[tokio::test]
    async fn infinite_loop_times_out() {
        let sandbox = ScriptSandbox::new(caps(), 200);
        let outcome = sandbox
            .run(serde_json::json!(null), "while (true) {}".to_string())
            .await
            .expect("sandbox should run");
        assert_eq!(outcome.error.as_ref().map(|e| e.name.as_str()), Some("Timeout"));
        assert!(outcome.logs.is_empty());
    }

    #[tokio::test]
    async fn fs_denied_without_allowed_roots() {
        let sandbox = ScriptSandbox::new(caps(), 1_000);
        let outcome = sandbox
            .run(serde_json::json!(null), "return fs::read_file(\"/etc/passwd\");".to_string())
            .await
            .expect("sandbox should run");
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn flow_state_round_trips() {
        let sandbox = ScriptSandbox::new(caps(), 1_000);
        let outcome = sandbox
            .run(
                serde_json::json!(null),
                "flow_state::set(\"k\", 7); return flow_state::get(\"k\");".to_string(),
            )
            .await
            .expect("sandbox should run");
        assert_eq!(outcome.result, serde_json::json!(7));
    }
}
