//! The individual gate stages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ArtifactRef, QualityGateResult, StageName};
use crate::ports::{GateCheck, TestRunner};

/// One stage of the pipeline. A stage only sees the artifact; stages share no state.
#[async_trait]
pub trait GateStage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(&self, artifact: &ArtifactRef) -> QualityGateResult;
}

/// Pass/fail stage backed by an external checker (format, lint, type-check, security-scan).
pub struct CheckStage {
    name: StageName,
    check: Arc<dyn GateCheck>,
}

impl CheckStage {
    pub fn new(name: StageName, check: Arc<dyn GateCheck>) -> Self {
        Self { name, check }
    }
}

#[async_trait]
impl GateStage for CheckStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn run(&self, artifact: &ArtifactRef) -> QualityGateResult {
        let outcome = self.check.check(artifact).await;
        QualityGateResult {
            stage_name: self.name,
            passed: outcome.passed,
            detail: outcome.detail,
        }
    }
}

/// Test run plus coverage threshold. Fails if the tests fail, or if they pass
/// with coverage below `min_coverage` (percent) or not a finite number.
pub struct CoverageStage {
    runner: Arc<dyn TestRunner>,
    min_coverage: f64,
}

impl CoverageStage {
    pub fn new(runner: Arc<dyn TestRunner>, min_coverage: f64) -> Self {
        Self { runner, min_coverage }
    }
}

#[async_trait]
impl GateStage for CoverageStage {
    fn name(&self) -> StageName {
        StageName::TestRun
    }

    async fn run(&self, artifact: &ArtifactRef) -> QualityGateResult {
        let outcome = self.runner.run_tests(artifact).await;
        if !outcome.passed {
            return QualityGateResult::fail(StageName::TestRun, outcome.detail);
        }
        // NaN は比較がすべて false になるので先に弾く
        if !outcome.coverage.is_finite() {
            return QualityGateResult::fail(
                StageName::TestRun,
                format!("coverage {} is not a finite percentage", outcome.coverage),
            );
        }
        if outcome.coverage < self.min_coverage {
            return QualityGateResult::fail(
                StageName::TestRun,
                format!(
                    "coverage {:.1}% below minimum {:.1}%",
                    outcome.coverage, self.min_coverage
                ),
            );
        }
        QualityGateResult::pass(
            StageName::TestRun,
            format!("{} (coverage {:.1}%)", outcome.detail, outcome.coverage),
        )
    }
}
