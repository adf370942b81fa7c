//! The scan-cycle engine — continuous deployment mode.
//!
//! A flow deployed in continuous mode is driven by a [`ScanEngine`] instead
//! of a single [`crate::executor::Executor::run`] call: the same executor
//! pass repeats on a fixed period, with an [`InputStateManager`] carrying
//! each tick's outputs forward so a node that didn't run on a given tick —
//! excluded from scheduling, or failed with `onError = continue` — still
//! looks "produced" to its downstream edges on the next one. The
//! input-state manager provides a happens-before edge from tick N's
//! terminal writes to tick N+1's reads.
//!
//! Ticks run on a periodic `tokio::time::interval` loop. Backpressure — if
//! ticks fall behind by more than one period, drop intermediate ticks
//! rather than queue them — is exactly what
//! `tokio::time::MissedTickBehavior::Skip` does natively, so the loop leans
//! on that instead of hand-rolling a catch-up counter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::config::EngineConfig;
use crate::executor::Executor;
use crate::models::{ExecutionRecord, FlowDocument, NodeOutputRecord};

/// One deployed flow's carried-forward node outputs. Keyed by `node_id`
/// rather than `(node_id, port)`: this engine gives every node a single
/// declared output (`NodeOutputRecord` carries one `TagValue`), so the
/// producer's id is already the unique key edges resolve through — the
/// same convention [`crate::executor::Executor::resolve_inputs`] uses for
/// a single tick.
#[derive(Default)]
pub struct InputStateManager {
    last_outputs: DashMap<String, NodeOutputRecord>,
}

impl InputStateManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every node's last-known output, for seeding the next
    /// tick's [`Executor::run_seeded`] call.
    #[must_use]
    pub fn snapshot(&self) -> std::collections::HashMap<String, NodeOutputRecord> {
        self.last_outputs.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }

    /// Single-writer-per-key merge of a completed tick's outputs. Each
    /// entry simply overwrites the previous one — any-reader,
    /// last-write-wins.
    pub fn merge(&self, outputs: std::collections::HashMap<String, NodeOutputRecord>) {
        for (node_id, output) in outputs {
            self.last_outputs.insert(node_id, output);
        }
    }

    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<NodeOutputRecord> {
        self.last_outputs.get(node_id).map(|e| e.value().clone())
    }
}

/// Resource statistics for one deployed flow's scan loop: cycles/second,
/// scan-efficiency percent, scan duration avg/max, memory peak/avg, uptime,
/// and last-scan timestamp.
#[derive(Debug, Clone)]
pub struct ScanStats {
    pub cycles: u64,
    pub skipped_ticks: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_scan_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_total: Duration,
    pub duration_max: Duration,
    pub memory_peak_kb: u64,
    memory_total_kb: u64,
}

impl ScanStats {
    fn new() -> Self {
        Self {
            cycles: 0,
            skipped_ticks: 0,
            started_at: chrono::Utc::now(),
            last_scan_at: None,
            duration_total: Duration::ZERO,
            duration_max: Duration::ZERO,
            memory_peak_kb: 0,
            memory_total_kb: 0,
        }
    }

    fn record_tick(&mut self, elapsed: Duration, memory_kb: u64) {
        self.cycles += 1;
        self.last_scan_at = Some(chrono::Utc::now());
        self.duration_total += elapsed;
        self.duration_max = self.duration_max.max(elapsed);
        self.memory_peak_kb = self.memory_peak_kb.max(memory_kb);
        self.memory_total_kb += memory_kb;
    }

    fn record_skip(&mut self) {
        self.skipped_ticks += 1;
    }

    /// `cycles / second` since the loop started.
    #[must_use]
    pub fn cycles_per_second(&self) -> f64 {
        let uptime = (chrono::Utc::now() - self.started_at).num_milliseconds().max(1) as f64 / 1000.0;
        self.cycles as f64 / uptime
    }

    /// `scan duration / scan period`, as a percentage; over 100% means the
    /// engine is structurally unable to keep up with the configured period,
    /// and callers should raise a warning.
    #[must_use]
    pub fn efficiency_percent(&self, period: Duration) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        let avg = self.duration_total.as_secs_f64() / self.cycles as f64;
        (avg / period.as_secs_f64()) * 100.0
    }

    #[must_use]
    pub fn duration_avg(&self) -> Duration {
        if self.cycles == 0 {
            Duration::ZERO
        } else {
            self.duration_total / self.cycles as u32
        }
    }

    #[must_use]
    pub fn memory_avg_kb(&self) -> u64 {
        if self.cycles == 0 {
            0
        } else {
            self.memory_total_kb / self.cycles
        }
    }

    #[must_use]
    pub fn uptime(&self) -> chrono::Duration {
        chrono::Utc::now() - self.started_at
    }
}

/// Soft memory ceiling; crossing it should raise a warning. Not
/// configurable via `EngineConfig` today — there is no named knob for it —
/// but kept as a named constant rather than a magic number at the call
/// site.
const MEMORY_SOFT_CEILING_KB: u64 = 512 * 1024;

/// Drives one deployed flow's continuous scan loop. Construct one per
/// deployed flow; `stop()` (or dropping the returned cancellation handle)
/// ends the loop after the in-flight tick, if any, completes.
pub struct ScanEngine {
    executor: Arc<Executor>,
    period: Duration,
    config: EngineConfig,
    input_state: Arc<InputStateManager>,
    stats: std::sync::Mutex<ScanStats>,
    cancel: Arc<AtomicBool>,
}

impl ScanEngine {
    #[must_use]
    pub fn new(executor: Arc<Executor>, period: Duration, config: EngineConfig) -> Self {
        Self {
            executor,
            period: period.max(Duration::from_millis(1)),
            config,
            input_state: Arc::new(InputStateManager::new()),
            stats: std::sync::Mutex::new(ScanStats::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn input_state(&self) -> Arc<InputStateManager> {
        self.input_state.clone()
    }

    /// A clone-able flag the caller can flip to stop the loop between
    /// ticks — observed only at the `interval.tick().await` boundary.
    #[must_use]
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> ScanStats {
        self.stats.lock().expect("scan stats mutex poisoned").clone()
    }

    /// Run the continuous loop for `flow` until [`ScanEngine::stop`] is
    /// called or the cancellation handle is flipped elsewhere. Returns once
    /// the loop has observed cancellation — the final in-progress tick, if
    /// any, has already run to completion.
    pub async fn run(&self, flow: FlowDocument) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut skip_next = false;
        let budget = self.config.tick_budget(self.period);

        loop {
            interval.tick().await;
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }

            if skip_next {
                skip_next = false;
                self.stats.lock().expect("scan stats mutex poisoned").record_skip();
                warn!(flow_id = %flow.id, "skipping scan tick to catch up after budget overrun");
                continue;
            }

            let elapsed = self.run_tick(&flow).await;
            if elapsed > budget {
                warn!(
                    flow_id = %flow.id,
                    elapsed_ms = elapsed.as_millis(),
                    budget_ms = budget.as_millis(),
                    "scan tick exceeded its wall-time budget, skipping next tick"
                );
                skip_next = true;
            }

            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
        }
    }

    /// One tick: snapshot the input-state manager, run a full executor
    /// pass seeded from it, write the result back. Returns the tick's wall
    /// time so [`ScanEngine::run`] can judge the budget.
    async fn run_tick(&self, flow: &FlowDocument) -> Duration {
        let started = Instant::now();
        let seed = self.input_state.snapshot();

        let result = self.executor.run_seeded(flow, None, None, seed).await;
        let elapsed = started.elapsed();

        match result {
            Ok(record) => self.input_state.merge(record.node_outputs),
            Err(err) => warn!(flow_id = %flow.id, error = %err, "scan tick's executor pass failed"),
        }

        let memory_kb = current_process_memory_kb();
        if memory_kb > MEMORY_SOFT_CEILING_KB {
            warn!(flow_id = %flow.id, memory_kb, ceiling_kb = MEMORY_SOFT_CEILING_KB, "scan engine memory crossed the soft ceiling");
        }

        let efficiency = {
            let mut stats = self.stats.lock().expect("scan stats mutex poisoned");
            stats.record_tick(elapsed, memory_kb);
            stats.efficiency_percent(self.period)
        };
        if efficiency > 100.0 {
            warn!(flow_id = %flow.id, efficiency, "scan efficiency exceeded 100%");
        }

        elapsed
    }

    /// Run exactly one tick and return its resulting [`ExecutionRecord`],
    /// for callers (tests, a `scan --once` CLI flag) that want a single
    /// observable pass rather than the open-ended loop.
    pub async fn tick_once(&self, flow: &FlowDocument) -> Result<ExecutionRecord, crate::error::EngineError> {
        let seed = self.input_state.snapshot();
        let result = self.executor.run_seeded(flow, None, None, seed).await;
        if let Ok(record) = &result {
            self.input_state.merge(record.node_outputs.clone());
        }
        result
    }
}

/// Current process resident memory in KiB, best-effort. `sysinfo` is the
/// idiomatic portable way to read this in the Rust ecosystem (used
/// elsewhere in this retrieval pack for the same purpose); `0` is returned
/// if the current process can't be found in the refreshed snapshot, which
/// only downgrades the soft-ceiling warning to a false negative rather than
/// failing the scan tick.
fn current_process_memory_kb() -> u64 {
    let mut system = System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::new().with_memory()));
    let pid = Pid::from_u32(std::process::id());
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory()).unwrap_or(0) / 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Collaborators;
    use crate::models::{Edge, ExecutionStatus, NodeInstance};
    use async_trait::async_trait;
    use nodes::context::{ControlStore, Publisher, RuntimeCache, TimeSeriesStore};
    use nodes::error::NodeError;
    use nodes::tag::{DriverType, TagData, TagValue};
    use registry::NodeRegistry;
    use serde_json::json;
    use uuid::Uuid;

    struct NullControl;
    #[async_trait]
    impl ControlStore for NullControl {
        async fn query(&self, _sql: &str, _params: Vec<serde_json::Value>) -> Result<Vec<serde_json::Value>, NodeError> {
            Ok(vec![])
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

    fn test_executor() -> Arc<Executor> {
        let registry = Arc::new(NodeRegistry::new());
        registry::register_builtins(&registry);
        Arc::new(Executor::new(
            registry,
            Collaborators {
                control: Arc::new(NullControl),
                tsdb: Arc::new(NullTsdb),
                bus: Arc::new(NullBus),
                runtime_cache: Arc::new(NullCache),
            },
            None,
        ))
    }

    fn node(id: &str, ty: &str, data: serde_json::Value) -> NodeInstance {
        NodeInstance { id: id.to_string(), node_type: ty.to_string(), data, position: serde_json::Value::Null }
    }

    fn edge(from: &str, to: &str, to_port: &str) -> Edge {
        Edge { source_node_id: from.to_string(), source_port: "out".to_string(), target_node_id: to.to_string(), target_port: to_port.to_string() }
    }

    #[tokio::test]
    async fn input_state_manager_carries_previous_output_forward() {
        let ism = InputStateManager::new();
        assert!(ism.snapshot().is_empty());

        let mut outputs = std::collections::HashMap::new();
        outputs.insert(
            "a".to_string(),
            NodeOutputRecord {
                tag_value: TagValue::good(TagData::Number(3.0)),
                operation: "tick".to_string(),
                inputs: serde_json::Value::Null,
                execution_time_ms: 0,
                timestamp: chrono::Utc::now(),
                error: None,
            },
        );
        ism.merge(outputs);
        assert_eq!(ism.get("a").unwrap().tag_value.value.as_f64(), Some(3.0));
        assert_eq!(ism.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn tick_once_seeds_the_next_tick_from_the_previous_ones_output() {
        let mut flow = FlowDocument::new(
            "scan-flow",
            vec![node("src", "tag-input", json!({"tagId": Uuid::new_v4()})), node("double", "math", json!({"operation": "multiply"}))],
            vec![edge("src", "double", "input1")],
        );
        flow.pin_data.insert("src".to_string(), TagValue::good(TagData::Number(4.0)));

        let engine = ScanEngine::new(test_executor(), Duration::from_millis(100), EngineConfig::default());
        let first = engine.tick_once(&flow).await.unwrap();
        assert_eq!(first.status, ExecutionStatus::Completed);

        // "double" only has one declared input here; multiply of a single
        // input folds to itself — the point of this test is that the
        // input-state manager now remembers "double"'s last output.
        assert!(engine.input_state().get("double").is_some());

        let second = engine.tick_once(&flow).await.unwrap();
        assert_eq!(second.status, ExecutionStatus::Completed);
    }

    #[test]
    fn scan_stats_compute_efficiency_and_averages() {
        let mut stats = ScanStats::new();
        stats.record_tick(Duration::from_millis(500), 1024);
        stats.record_tick(Duration::from_millis(1_500), 2048);
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.duration_avg(), Duration::from_millis(1_000));
        assert_eq!(stats.memory_avg_kb(), 1536);
        // avg 1000ms over a 1000ms period = 100% efficiency exactly.
        assert!((stats.efficiency_percent(Duration::from_millis(1_000)) - 100.0).abs() < 0.01);
    }

    #[test]
    fn scan_stats_efficiency_over_100_percent_signals_overrun() {
        let mut stats = ScanStats::new();
        stats.record_tick(Duration::from_millis(1_200), 0);
        assert!(stats.efficiency_percent(Duration::from_millis(1_000)) > 100.0);
    }
}
