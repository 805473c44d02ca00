//! Orchestrator configuration.
//!
//! Loaded once from TOML at startup and never mutated afterwards. Every field
//! except `[[workers]]` has a default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{Affinity, Category, RetryPolicy, StageName};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: PolicyConfig,
    pub gate: GateConfig,
    pub workers: Vec<WorkerGroupConfig>,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub max_attempts: u32,
    pub stuck_timeout_secs: u64,
    pub orchestrator_interval_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_jitter_ms: u64,
    pub producer_timeout_secs: u64,
    pub gate_timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            stuck_timeout_secs: 900,
            orchestrator_interval_secs: 60,
            poll_interval_ms: 500,
            poll_jitter_ms: 250,
            producer_timeout_secs: 600,
            gate_timeout_secs: 240,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Minimum test coverage, percent.
    pub min_coverage: f64,

    /// Stage names (`format`, `lint`, `type-check`, `security-scan`, `test-run`)
    /// whose failure escalates without retrying.
    pub non_retriable_stages: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_coverage: 80.0,
            non_retriable_stages: vec![StageName::SecurityScan.to_string()],
        }
    }
}

/// `count` identical workers sharing one affinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerGroupConfig {
    pub count: usize,
    pub affinity: Vec<Category>,
}

impl WorkerGroupConfig {
    pub fn affinity(&self) -> Affinity {
        Affinity::new(self.affinity.iter().cloned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// JSON snapshot location. `None` keeps the store purely in memory.
    pub snapshot_path: Option<PathBuf>,
}

/// Timing and retry knobs in their runtime form.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub max_attempts: u32,
    pub stuck_timeout: Duration,
    pub orchestrator_interval: Duration,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    pub producer_timeout: Duration,
    /// Upper bound for one full quality gate run.
    pub gate_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        PolicyConfig::default().to_policy()
    }
}

impl PolicyConfig {
    pub fn to_policy(&self) -> Policy {
        Policy {
            max_attempts: self.max_attempts,
            stuck_timeout: Duration::from_secs(self.stuck_timeout_secs),
            orchestrator_interval: Duration::from_secs(self.orchestrator_interval_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_jitter: Duration::from_millis(self.poll_jitter_ms),
            producer_timeout: Duration::from_secs(self.producer_timeout_secs),
            gate_timeout: Duration::from_secs(self.gate_timeout_secs),
        }
    }
}

impl Config {
    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading config");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.policy;
        if p.max_attempts < 1 {
            return invalid("policy.max_attempts must be at least 1");
        }
        for (name, value) in [
            ("stuck_timeout_secs", p.stuck_timeout_secs),
            ("orchestrator_interval_secs", p.orchestrator_interval_secs),
            ("poll_interval_ms", p.poll_interval_ms),
            ("producer_timeout_secs", p.producer_timeout_secs),
            ("gate_timeout_secs", p.gate_timeout_secs),
        ] {
            if value == 0 {
                return invalid(format!("policy.{name} must be greater than 0"));
            }
        }
        // 実行中の worker (producer + gate) を reconciliation が横取りしないように
        let busy_limit = p.producer_timeout_secs.saturating_add(p.gate_timeout_secs);
        if p.stuck_timeout_secs <= busy_limit {
            return invalid(format!(
                "policy.stuck_timeout_secs ({}) must exceed producer_timeout_secs + gate_timeout_secs ({busy_limit})",
                p.stuck_timeout_secs
            ));
        }

        if !(0.0..=100.0).contains(&self.gate.min_coverage) {
            return invalid(format!(
                "gate.min_coverage must be within 0..=100, got {}",
                self.gate.min_coverage
            ));
        }
        for name in &self.gate.non_retriable_stages {
            if let Err(e) = name.parse::<StageName>() {
                return invalid(format!("gate.non_retriable_stages: {e}"));
            }
        }

        if self.workers.is_empty() {
            return invalid("at least one [[workers]] group is required");
        }
        for (i, group) in self.workers.iter().enumerate() {
            if group.count == 0 {
                return invalid(format!("workers[{i}].count must be at least 1"));
            }
            if group.affinity.is_empty() {
                return invalid(format!("workers[{i}].affinity must not be empty"));
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> Policy {
        self.policy.to_policy()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.policy.max_attempts,
            non_retriable_stages: self
                .gate
                .non_retriable_stages
                .iter()
                .filter_map(|name| name.parse().ok())
                .collect::<HashSet<StageName>>(),
        }
    }

    /// Union of every worker group's affinity.
    pub fn claimable_categories(&self) -> HashSet<Category> {
        self.workers
            .iter()
            .flat_map(|group| group.affinity.iter().cloned())
            .collect()
    }

    pub fn total_workers(&self) -> usize {
        self.workers.iter().map(|group| group.count).sum()
    }
}

fn invalid(msg: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(msg.into()))
}
