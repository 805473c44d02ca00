//! Gate tooling that always passes. Used for stages with no configured tool.

use async_trait::async_trait;

use crate::domain::ArtifactRef;
use crate::ports::{CheckOutcome, GateCheck, TestOutcome, TestRunner};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCheck;

#[async_trait]
impl GateCheck for NoopCheck {
    async fn check(&self, _artifact: &ArtifactRef) -> CheckOutcome {
        CheckOutcome::passed("skipped")
    }
}

/// Passes with full coverage, so the coverage threshold never trips.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTestRunner;

#[async_trait]
impl TestRunner for NoopTestRunner {
    async fn run_tests(&self, _artifact: &ArtifactRef) -> TestOutcome {
        TestOutcome {
            passed: true,
            detail: "skipped".to_string(),
            coverage: 100.0,
        }
    }
}
