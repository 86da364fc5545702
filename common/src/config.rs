//! Pipeline configuration
//!
//! All tunables for the signal lifecycle pipeline, loaded from a single
//! TOML file. Every field has a default so a partial file is enough.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the decision pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// File locations for the three owned logs
    #[serde(default)]
    pub storage: StorageConfig,

    /// External gate evaluation settings
    #[serde(default)]
    pub gates: GateConfig,

    /// Stuck-signal and auto-expiry thresholds
    #[serde(default)]
    pub expiry: ExpiryConfig,

    /// Pipeline monitor health thresholds
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Shadow execution engine settings
    #[serde(default)]
    pub shadow: ShadowConfig,

    /// Decision tracker settings
    #[serde(default)]
    pub decisions: DecisionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            gates: GateConfig::default(),
            expiry: ExpiryConfig::default(),
            monitor: MonitorConfig::default(),
            shadow: ShadowConfig::default(),
            decisions: DecisionConfig::default(),
        }
    }
}

/// File locations for persisted state.
///
/// The event log, decisions log and shadow outcomes log are the only state
/// this pipeline owns; consumers read them but never write them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding all pipeline data files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_event_log_file")]
    pub event_log_file: String,

    #[serde(default = "default_decisions_file")]
    pub decisions_file: String,

    #[serde(default = "default_shadow_outcomes_file")]
    pub shadow_outcomes_file: String,

    #[serde(default = "default_shadow_checkpoint_file")]
    pub shadow_checkpoint_file: String,

    /// Weight vector published by the external tuning process
    #[serde(default = "default_weights_file")]
    pub weights_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            event_log_file: default_event_log_file(),
            decisions_file: default_decisions_file(),
            shadow_outcomes_file: default_shadow_outcomes_file(),
            shadow_checkpoint_file: default_shadow_checkpoint_file(),
            weights_file: default_weights_file(),
        }
    }
}

impl StorageConfig {
    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join(&self.event_log_file)
    }

    pub fn decisions_path(&self) -> PathBuf {
        self.data_dir.join(&self.decisions_file)
    }

    pub fn shadow_outcomes_path(&self) -> PathBuf {
        self.data_dir.join(&self.shadow_outcomes_file)
    }

    pub fn shadow_checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(&self.shadow_checkpoint_file)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.data_dir.join(&self.weights_file)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_event_log_file() -> String {
    "events.jsonl".to_string()
}

fn default_decisions_file() -> String {
    "decisions.jsonl".to_string()
}

fn default_shadow_outcomes_file() -> String {
    "shadow_outcomes.jsonl".to_string()
}

fn default_shadow_checkpoint_file() -> String {
    "shadow_checkpoint.json".to_string()
}

fn default_weights_file() -> String {
    "weights.toml".to_string()
}

/// External gate evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Timeout for a single gate call (ms). A timed-out gate blocks the
    /// signal with reason "gate_timeout" instead of crashing the pipeline.
    #[serde(default = "default_gate_timeout_ms")]
    pub gate_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            gate_timeout_ms: default_gate_timeout_ms(),
        }
    }
}

fn default_gate_timeout_ms() -> u64 {
    2_000
}

/// Stuck-signal and auto-expiry thresholds.
///
/// The stuck threshold is deliberately shorter than the expiry threshold so
/// operators see a signal on the monitor before it is force-expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    /// A signal in the same non-settled state longer than this is "stuck"
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,

    /// Signals older than this in an expirable state are force-expired
    #[serde(default = "default_expire_after_secs")]
    pub expire_after_secs: u64,

    /// How often the expiry sweep runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_secs: default_stuck_threshold_secs(),
            expire_after_secs: default_expire_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_stuck_threshold_secs() -> u64 {
    3_600 // 1 hour
}

fn default_expire_after_secs() -> u64 {
    7_200 // 2 hours
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Pipeline monitor health thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Stuck-signal count at which health degrades from WARNING to CRITICAL
    #[serde(default = "default_critical_stuck_count")]
    pub critical_stuck_count: usize,

    /// How often the monitor snapshot is taken
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            critical_stuck_count: default_critical_stuck_count(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

fn default_critical_stuck_count() -> usize {
    10
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

/// Shadow execution engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowConfig {
    /// Catch-up poll cadence. Runs on its own schedule so an arbitrarily
    /// large backlog never delays the live path.
    #[serde(default = "default_shadow_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Virtual positions still open after this long are closed at mark
    #[serde(default = "default_shadow_max_hold_secs")]
    pub max_hold_secs: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_shadow_poll_interval_secs(),
            max_hold_secs: default_shadow_max_hold_secs(),
        }
    }
}

fn default_shadow_poll_interval_secs() -> u64 {
    5
}

fn default_shadow_max_hold_secs() -> u64 {
    86_400 // 24 hours
}

/// Decision tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Bounded queue between the trading path and the decision writer.
    /// A full queue drops the decision rather than blocking trading.
    #[serde(default = "default_decision_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_decision_queue_capacity(),
        }
    }
}

fn default_decision_queue_capacity() -> usize {
    1_024
}

/// Load configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a TOML file
pub fn save_config(config: &PipelineConfig, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.gates.gate_timeout_ms, 2_000);
        assert!(config.expiry.stuck_threshold_secs < config.expiry.expire_after_secs);
    }

    #[test]
    fn test_config_serialization() {
        let config = PipelineConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: PipelineConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(
            config.expiry.expire_after_secs,
            deserialized.expiry.expire_after_secs
        );
        assert_eq!(
            config.storage.event_log_file,
            deserialized.storage.event_log_file
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [expiry]
            expire_after_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.expiry.expire_after_secs, 600);
        assert_eq!(config.gates.gate_timeout_ms, 2_000);
        assert_eq!(config.storage.event_log_file, "events.jsonl");
    }

    #[test]
    fn test_storage_paths_join_data_dir() {
        let storage = StorageConfig::default();
        assert_eq!(storage.event_log_path(), PathBuf::from("data/events.jsonl"));
        assert_eq!(
            storage.shadow_checkpoint_path(),
            PathBuf::from("data/shadow_checkpoint.json")
        );
    }
}
