//! Quality gate pipeline.
//!
//! Stages run strictly in `StageName::ORDERED` order and the pipeline stops at
//! the first failure. The report keeps every stage that ran, so the failing
//! stage is always the last entry.

mod stage;

pub use self::stage::{CheckStage, CoverageStage, GateStage};

use std::sync::Arc;

use tracing::debug;

use crate::domain::{ArtifactRef, GateReport, StageName};
use crate::impls::{NoopCheck, NoopTestRunner};
use crate::ports::{GateCheck, TestRunner};

/// External tooling, one per stage.
#[derive(Clone)]
pub struct GateChecks {
    pub format: Arc<dyn GateCheck>,
    pub lint: Arc<dyn GateCheck>,
    pub type_check: Arc<dyn GateCheck>,
    pub security_scan: Arc<dyn GateCheck>,
    pub test_runner: Arc<dyn TestRunner>,
}

impl GateChecks {
    /// Every stage passes.
    pub fn noop() -> Self {
        Self {
            format: Arc::new(NoopCheck),
            lint: Arc::new(NoopCheck),
            type_check: Arc::new(NoopCheck),
            security_scan: Arc::new(NoopCheck),
            test_runner: Arc::new(NoopTestRunner),
        }
    }
}

impl Default for GateChecks {
    fn default() -> Self {
        Self::noop()
    }
}

pub struct QualityGatePipeline {
    stages: Vec<Box<dyn GateStage>>,
}

impl QualityGatePipeline {
    /// `min_coverage` is a percentage; injected from configuration.
    pub fn new(checks: GateChecks, min_coverage: f64) -> Self {
        let stages: Vec<Box<dyn GateStage>> = StageName::ORDERED
            .into_iter()
            .map(|name| -> Box<dyn GateStage> {
                match name {
                    StageName::Format => Box::new(CheckStage::new(name, checks.format.clone())),
                    StageName::Lint => Box::new(CheckStage::new(name, checks.lint.clone())),
                    StageName::TypeCheck => Box::new(CheckStage::new(name, checks.type_check.clone())),
                    StageName::SecurityScan => {
                        Box::new(CheckStage::new(name, checks.security_scan.clone()))
                    }
                    StageName::TestRun => {
                        Box::new(CoverageStage::new(checks.test_runner.clone(), min_coverage))
                    }
                }
            })
            .collect();
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, artifact: &ArtifactRef) -> GateReport {
        let mut report = GateReport::default();
        for stage in &self.stages {
            let result = stage.run(artifact).await;
            debug!(
                task_id = %artifact.task_id,
                stage = %result.stage_name,
                passed = result.passed,
                "gate stage finished"
            );
            let failed = !result.passed;
            report.results.push(result);
            if failed {
                break;
            }
        }
        report
    }
}
