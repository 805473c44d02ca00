//! Quality gate result types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The fixed set of gate stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    Format,
    Lint,
    TypeCheck,
    SecurityScan,
    TestRun,
}

impl StageName {
    pub const ORDERED: [StageName; 5] = [
        StageName::Format,
        StageName::Lint,
        StageName::TypeCheck,
        StageName::SecurityScan,
        StageName::TestRun,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Format => "format",
            StageName::Lint => "lint",
            StageName::TypeCheck => "type-check",
            StageName::SecurityScan => "security-scan",
            StageName::TestRun => "test-run",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown gate stage: {0}")]
pub struct ParseStageError(pub String);

impl FromStr for StageName {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ORDERED
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub stage_name: StageName,
    pub passed: bool,
    pub detail: String,
}

impl QualityGateResult {
    pub fn pass(stage_name: StageName, detail: impl Into<String>) -> Self {
        Self {
            stage_name,
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(stage_name: StageName, detail: impl Into<String>) -> Self {
        Self {
            stage_name,
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Results of one pipeline run. Holds every stage that actually ran; the
/// pipeline stops after the first failure, so at most the last entry failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub results: Vec<QualityGateResult>,
}

impl GateReport {
    /// Logical AND over the stages. An empty report never passes.
    pub fn passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }

    pub fn failed_stage(&self) -> Option<&QualityGateResult> {
        self.results.iter().find(|r| !r.passed)
    }
}
