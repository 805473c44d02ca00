//! Subprocess adapters - 外部コマンドを Producer / GateCheck / TestRunner として使う

use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use foreman_core::domain::{ArtifactRef, Category, ProducerError, TaskId};
use foreman_core::gate::GateChecks;
use foreman_core::impls::{NoopCheck, NoopTestRunner};
use foreman_core::ports::{CheckOutcome, GateCheck, Producer, TestOutcome, TestRunner};
use tokio::process::Command;
use tracing::debug;

use crate::settings::{ChecksConfig, ProducerConfig};

fn substitute(argv: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    argv.iter()
        .map(|arg| {
            vars.iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(&format!("{{{key}}}"), value))
        })
        .collect()
}

/// Spawn failures come back as a printable message naming the program.
async fn run(argv: &[String]) -> Result<Output, String> {
    let (program, args) = argv.split_first().ok_or("empty command")?;
    debug!(program, ?args, "spawning");
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("spawn {program}: {e}"))
}

/// Last non-empty output line, stdout before stderr.
fn last_line(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr
        .lines()
        .chain(stdout.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or_default()
        .to_string()
}

/// Runs the configured argv once per task; trimmed stdout is the artifact location.
pub struct CommandProducer {
    argv: Vec<String>,
    transient_exit_codes: Vec<i32>,
}

impl CommandProducer {
    pub fn new(config: &ProducerConfig) -> Self {
        Self {
            argv: config.command.clone(),
            transient_exit_codes: config.transient_exit_codes.clone(),
        }
    }
}

#[async_trait]
impl Producer for CommandProducer {
    async fn produce(&self, category: &Category, task_id: &TaskId) -> Result<ArtifactRef, ProducerError> {
        let argv = substitute(
            &self.argv,
            &[("category", category.as_str()), ("task_id", task_id.as_str())],
        );
        let output = run(&argv)
            .await
            .map_err(ProducerError::Transient)?;

        match output.status.code() {
            Some(0) => {
                let location = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if location.is_empty() {
                    return Err(ProducerError::Permanent("producer printed no artifact location".into()));
                }
                Ok(ArtifactRef::new(task_id.clone(), category.clone(), location))
            }
            // signal で殺された場合は code が無い
            None => Err(ProducerError::Transient(format!("terminated by signal: {}", last_line(&output)))),
            Some(code) if self.transient_exit_codes.contains(&code) => {
                Err(ProducerError::Transient(format!("exit {code}: {}", last_line(&output))))
            }
            Some(code) => Err(ProducerError::Permanent(format!("exit {code}: {}", last_line(&output)))),
        }
    }
}

pub struct CommandCheck {
    argv: Vec<String>,
}

impl CommandCheck {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl GateCheck for CommandCheck {
    async fn check(&self, artifact: &ArtifactRef) -> CheckOutcome {
        let argv = substitute(&self.argv, &[("artifact", &artifact.location)]);
        match run(&argv).await {
            Ok(output) if output.status.success() => CheckOutcome::passed(last_line(&output)),
            Ok(output) => CheckOutcome::failed(last_line(&output)),
            Err(e) => CheckOutcome::failed(e),
        }
    }
}

pub struct CommandTestRunner {
    argv: Vec<String>,
}

impl CommandTestRunner {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

/// Last `coverage: <float>` line on stdout; 0.0 when absent. `nan` / `inf`
/// are not coverage figures and are skipped.
fn parse_coverage(stdout: &str) -> f64 {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("coverage:"))
        .filter_map(|value| value.trim().trim_end_matches('%').parse::<f64>().ok())
        .filter(|coverage| coverage.is_finite())
        .last()
        .unwrap_or(0.0)
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_tests(&self, artifact: &ArtifactRef) -> TestOutcome {
        let argv = substitute(&self.argv, &[("artifact", &artifact.location)]);
        match run(&argv).await {
            Ok(output) => TestOutcome {
                passed: output.status.success(),
                detail: last_line(&output),
                coverage: parse_coverage(&String::from_utf8_lossy(&output.stdout)),
            },
            Err(e) => TestOutcome {
                passed: false,
                detail: e,
                coverage: 0.0,
            },
        }
    }
}

fn check(argv: Option<&Vec<String>>) -> Arc<dyn GateCheck> {
    match argv {
        Some(argv) => Arc::new(CommandCheck::new(argv.clone())),
        None => Arc::new(NoopCheck),
    }
}

pub fn gate_checks(config: &ChecksConfig) -> GateChecks {
    let test_runner: Arc<dyn TestRunner> = match &config.test_run {
        Some(argv) => Arc::new(CommandTestRunner::new(argv.clone())),
        None => Arc::new(NoopTestRunner),
    };
    GateChecks {
        format: check(config.format.as_ref()),
        lint: check(config.lint.as_ref()),
        type_check: check(config.type_check.as_ref()),
        security_scan: check(config.security_scan.as_ref()),
        test_runner,
    }
}
