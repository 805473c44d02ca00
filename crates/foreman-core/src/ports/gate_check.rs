//! Gate tooling ports (format / lint / type-check / security-scan / tests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ArtifactRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub detail: String,
}

impl CheckOutcome {
    pub fn passed(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// One external checker. Must not depend on any other stage having run.
#[async_trait]
pub trait GateCheck: Send + Sync {
    async fn check(&self, artifact: &ArtifactRef) -> CheckOutcome;
}

/// Test run result. `coverage` is a percentage in `0.0..=100.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    pub detail: String,
    pub coverage: f64,
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, artifact: &ArtifactRef) -> TestOutcome;
}
