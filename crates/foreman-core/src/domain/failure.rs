//! Failure classification recorded in `TaskRecord::last_error`.
//!
//! The classification drives the retry/escalation decision; the message is
//! free-form and only meant for humans.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::ProducerError;
use super::gate::{QualityGateResult, StageName};
use super::state::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Producer reported a transient error (network, rate limit, ...).
    ProducerTransient,
    /// Producer reported an error that will not go away by retrying.
    ProducerPermanent,
    /// Producer did not answer within the configured timeout.
    ProducerTimeout,
    /// The gate pipeline did not finish within the configured timeout.
    GateTimeout,
    /// A quality gate stage rejected the artifact.
    QualityGate,
    /// Reconciliation reclaimed the task from an unresponsive worker.
    StuckTimeout,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ProducerTransient => "producer_transient",
            FailureKind::ProducerPermanent => "producer_permanent",
            FailureKind::ProducerTimeout => "producer_timeout",
            FailureKind::GateTimeout => "gate_timeout",
            FailureKind::QualityGate => "quality_gate",
            FailureKind::StuckTimeout => "stuck_timeout",
        }
    }
}

/// Classified failure: tag + message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,

    /// Failing stage, set only for `QualityGate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,

    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: None,
            message: message.into(),
        }
    }

    pub fn from_producer(err: &ProducerError) -> Self {
        match err {
            ProducerError::Transient(msg) => Self::new(FailureKind::ProducerTransient, msg.clone()),
            ProducerError::Permanent(msg) => Self::new(FailureKind::ProducerPermanent, msg.clone()),
        }
    }

    pub fn producer_timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::ProducerTimeout,
            format!("producer did not finish within {}s", limit.as_secs_f64()),
        )
    }

    pub fn gate_timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::GateTimeout,
            format!("quality gate did not finish within {}s", limit.as_secs_f64()),
        )
    }

    pub fn quality_gate(result: &QualityGateResult) -> Self {
        Self {
            kind: FailureKind::QualityGate,
            stage: Some(result.stage_name),
            message: result.detail.clone(),
        }
    }

    pub fn stuck(state: TaskState, idle: chrono::Duration) -> Self {
        Self::new(
            FailureKind::StuckTimeout,
            format!("reclaimed from {state} after {}s without progress", idle.num_seconds()),
        )
    }

    /// Classification tag, e.g. `producer_transient` or `quality_gate:lint`.
    pub fn tag(&self) -> String {
        match self.stage {
            Some(stage) => format!("{}:{}", self.kind.as_str(), stage),
            None => self.kind.as_str().to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tag(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_errors_keep_their_subkind() {
        let t = Failure::from_producer(&ProducerError::Transient("503".into()));
        assert_eq!(t.kind, FailureKind::ProducerTransient);
        let p = Failure::from_producer(&ProducerError::Permanent("bad schema".into()));
        assert_eq!(p.kind, FailureKind::ProducerPermanent);
        assert_eq!(p.to_string(), "producer_permanent: bad schema");
    }

    #[test]
    fn gate_failure_tag_includes_stage() {
        let result = QualityGateResult::fail(StageName::TypeCheck, "E0308 mismatched types");
        let failure = Failure::quality_gate(&result);
        assert_eq!(failure.tag(), "quality_gate:type-check");
        assert_eq!(failure.to_string(), "quality_gate:type-check: E0308 mismatched types");
    }

    #[test]
    fn serialized_form_omits_missing_stage() {
        let failure = Failure::producer_timeout(Duration::from_secs(30));
        let v = serde_json::to_value(&failure).unwrap();
        assert_eq!(v["kind"], "producer_timeout");
        assert!(v.get("stage").is_none());
    }
}
