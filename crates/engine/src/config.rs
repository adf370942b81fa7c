//! Engine configuration — the runtime's tunable knobs, read from the
//! environment with documented defaults and generalised into one struct so
//! `serve`/`scan` startup has a single place to read from instead of
//! scattering `std::env::var` calls through the binary.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// `system_metrics.poll_ms`, floored at 500ms.
const SYSTEM_METRICS_POLL_MS_FLOOR: u64 = 500;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `system_metrics.poll_ms` — metrics sampling period, floor 500.
    pub system_metrics_poll_ms: u64,
    /// `system_metrics.retention_days` — metrics TTL.
    pub system_metrics_retention_days: u32,
    /// `historian.retention_days` — telemetry retention.
    pub historian_retention_days: u32,
    /// `historian.compression_days` — telemetry compression horizon.
    pub historian_compression_days: u32,
    /// `flow.scan.default_ms` — default scan period, floor enforced by
    /// [`EngineConfig::scan_default`].
    pub flow_scan_default_ms: u64,
    /// `flow.scan.budget_fraction` — tick budget fraction, default 0.85.
    pub flow_scan_budget_fraction: f64,
    /// `flow.script.timeout_default_ms`.
    pub flow_script_timeout_default_ms: u64,
    /// `flow.script.max_ms` — hard ceiling a requested timeout is clamped
    /// to, `[0, 60_000] ms`.
    pub flow_script_timeout_max_ms: u64,
    /// `flow.script.allowed_paths` — comma-separated list of allowed
    /// filesystem roots for `$fs`; empty means filesystem access is denied.
    pub flow_script_allowed_paths: Vec<std::path::PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_metrics_poll_ms: 5_000,
            system_metrics_retention_days: 30,
            historian_retention_days: 90,
            historian_compression_days: 7,
            flow_scan_default_ms: 1_000,
            flow_scan_budget_fraction: 0.85,
            flow_script_timeout_default_ms: 10_000,
            flow_script_timeout_max_ms: 60_000,
            flow_script_allowed_paths: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Read every knob from its environment variable, falling back to the
    /// documented default when unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            system_metrics_poll_ms: env_u64("SYSTEM_METRICS_POLL_MS", defaults.system_metrics_poll_ms)
                .max(SYSTEM_METRICS_POLL_MS_FLOOR),
            system_metrics_retention_days: env_u32(
                "SYSTEM_METRICS_RETENTION_DAYS",
                defaults.system_metrics_retention_days,
            ),
            historian_retention_days: env_u32("HISTORIAN_RETENTION_DAYS", defaults.historian_retention_days),
            historian_compression_days: env_u32(
                "HISTORIAN_COMPRESSION_DAYS",
                defaults.historian_compression_days,
            ),
            flow_scan_default_ms: env_u64("FLOW_SCAN_DEFAULT_MS", defaults.flow_scan_default_ms),
            flow_scan_budget_fraction: env_f64(
                "FLOW_SCAN_BUDGET_FRACTION",
                defaults.flow_scan_budget_fraction,
            ),
            flow_script_timeout_default_ms: env_u64(
                "FLOW_SCRIPT_TIMEOUT_DEFAULT_MS",
                defaults.flow_script_timeout_default_ms,
            ),
            flow_script_timeout_max_ms: env_u64("FLOW_SCRIPT_TIMEOUT_MAX_MS", defaults.flow_script_timeout_max_ms),
            flow_script_allowed_paths: std::env::var("FLOW_SCRIPT_ALLOWED_PATHS")
                .ok()
                .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(std::path::PathBuf::from).collect())
                .unwrap_or_default(),
        }
    }

    /// The scan period to use for a flow that doesn't specify its own —
    /// `flow.scan.default_ms`, with the floor enforced here rather than at
    /// every call site.
    #[must_use]
    pub fn scan_default(&self) -> Duration {
        Duration::from_millis(self.flow_scan_default_ms.max(1))
    }

    /// The wall-time budget for one scan tick of period `period`:
    /// `P * budget_fraction`.
    #[must_use]
    pub fn tick_budget(&self, period: Duration) -> Duration {
        Duration::from_secs_f64(period.as_secs_f64() * self.flow_scan_budget_fraction)
    }

    /// Clamp a script's requested timeout into `[0, max_ms]`.
    #[must_use]
    pub fn clamp_script_timeout(&self, requested_ms: u64) -> Duration {
        Duration::from_millis(requested_ms.min(self.flow_script_timeout_max_ms))
    }

    /// [`EngineConfig::from_env`], then apply a `--config` TOML file on top
    /// of it — only the keys actually present in the file override the
    /// environment/default value, so an override file can be as small as a
    /// single tuned knob.
    pub fn from_env_and_file(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        let mut config = Self::from_env();
        let Some(path) = path else { return Ok(config) };
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Read(path.to_path_buf(), e))?;
        let overrides: ConfigOverrides = toml::from_str(&raw).map_err(|e| ConfigFileError::Parse(path.to_path_buf(), e))?;
        overrides.apply(&mut config);
        Ok(config)
    }
}

/// Errors from [`EngineConfig::from_env_and_file`] — kept separate from
/// [`crate::EngineError`] since a bad `--config` file is a startup-time
/// operator mistake, not a flow-execution failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("cannot read config file {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("invalid config file {0}: {1}")]
    Parse(std::path::PathBuf, toml::de::Error),
}

/// Every field optional — a `--config` file only ever overrides what it
/// names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ConfigOverrides {
    system_metrics_poll_ms: Option<u64>,
    system_metrics_retention_days: Option<u32>,
    historian_retention_days: Option<u32>,
    historian_compression_days: Option<u32>,
    flow_scan_default_ms: Option<u64>,
    flow_scan_budget_fraction: Option<f64>,
    flow_script_timeout_default_ms: Option<u64>,
    flow_script_timeout_max_ms: Option<u64>,
    flow_script_allowed_paths: Option<Vec<std::path::PathBuf>>,
}

impl ConfigOverrides {
    fn apply(self, config: &mut EngineConfig) {
        if let Some(v) = self.system_metrics_poll_ms {
            config.system_metrics_poll_ms = v.max(SYSTEM_METRICS_POLL_MS_FLOOR);
        }
        if let Some(v) = self.system_metrics_retention_days {
            config.system_metrics_retention_days = v;
        }
        if let Some(v) = self.historian_retention_days {
            config.historian_retention_days = v;
        }
        if let Some(v) = self.historian_compression_days {
            config.historian_compression_days = v;
        }
        if let Some(v) = self.flow_scan_default_ms {
            config.flow_scan_default_ms = v;
        }
        if let Some(v) = self.flow_scan_budget_fraction {
            config.flow_scan_budget_fraction = v;
        }
        if let Some(v) = self.flow_script_timeout_default_ms {
            config.flow_script_timeout_default_ms = v;
        }
        if let Some(v) = self.flow_script_timeout_max_ms {
            config.flow_script_timeout_max_ms = v;
        }
        if let Some(v) = self.flow_script_allowed_paths {
            config.flow_script_allowed_paths = v;
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.flow_scan_default_ms, 1_000);
        assert!((cfg.flow_scan_budget_fraction - 0.85).abs() < f64::EPSILON);
        assert_eq!(cfg.flow_script_timeout_default_ms, 10_000);
        assert_eq!(cfg.flow_script_timeout_max_ms, 60_000);
    }

    #[test]
    fn tick_budget_is_period_times_fraction() {
        let cfg = EngineConfig::default();
        let budget = cfg.tick_budget(Duration::from_millis(1_000));
        assert_eq!(budget, Duration::from_millis(850));
    }

    #[test]
    fn script_timeout_clamps_to_the_max() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.clamp_script_timeout(999_999), Duration::from_millis(60_000));
        assert_eq!(cfg.clamp_script_timeout(200), Duration::from_millis(200));
    }

    #[test]
    fn config_file_overrides_only_the_keys_it_names() {
        let dir = std::env::temp_dir().join(format!("engine-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("override.toml");
        std::fs::write(&path, "flow-scan-budget-fraction = 0.5\n").unwrap();

        let config = EngineConfig::from_env_and_file(Some(&path)).unwrap();
        assert!((config.flow_scan_budget_fraction - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.flow_scan_default_ms, EngineConfig::default().flow_scan_default_ms);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = EngineConfig::from_env_and_file(Some(Path::new("/nonexistent/path.toml"))).unwrap_err();
        assert!(matches!(err, ConfigFileError::Read(_, _)));
    }
}
