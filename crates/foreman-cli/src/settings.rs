//! Settings - バイナリ用の設定 (core config + subprocess adapters)

use std::path::Path;

use anyhow::{Context, bail};
use foreman_core::config::Config;
use serde::Deserialize;

/// EX_TEMPFAIL from sysexits.h.
const EX_TEMPFAIL: i32 = 75;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub core: Config,

    pub producer: ProducerConfig,

    #[serde(default)]
    pub checks: ChecksConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProducerConfig {
    /// argv; `{category}` and `{task_id}` are substituted per task.
    pub command: Vec<String>,

    #[serde(default = "default_transient_exit_codes")]
    pub transient_exit_codes: Vec<i32>,
}

fn default_transient_exit_codes() -> Vec<i32> {
    vec![EX_TEMPFAIL]
}

/// argv per gate stage; `{artifact}` is substituted. A missing entry means
/// the stage passes as "skipped".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChecksConfig {
    pub format: Option<Vec<String>>,
    pub lint: Option<Vec<String>>,
    pub type_check: Option<Vec<String>>,
    pub security_scan: Option<Vec<String>>,
    pub test_run: Option<Vec<String>>,
}

impl ChecksConfig {
    fn commands(&self) -> [(&'static str, Option<&Vec<String>>); 5] {
        [
            ("format", self.format.as_ref()),
            ("lint", self.lint.as_ref()),
            ("type_check", self.type_check.as_ref()),
            ("security_scan", self.security_scan.as_ref()),
            ("test_run", self.test_run.as_ref()),
        ]
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.core.validate()?;
        if self.producer.command.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("producer.command must name a program");
        }
        for (stage, argv) in self.checks.commands() {
            if let Some(argv) = argv
                && argv.first().is_none_or(|program| program.trim().is_empty())
            {
                bail!("checks.{stage} must name a program when set");
            }
        }
        Ok(())
    }
}
