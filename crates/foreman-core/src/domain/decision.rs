//! Decision model: what to do with a task after a failed cycle.
//!
//! The `Decider` is a pure function of (task record, failure). Applying the
//! decision (store transitions, re-enqueue) is the `RetryController`'s job.

use std::collections::HashSet;

use super::failure::{Failure, FailureKind};
use super::gate::StageName;
use super::task::TaskRecord;

/// Next action for a task sitting in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Back to `Pending` and the tail of its category queue.
    Retry { reason: String },

    /// Into `Blocked`; only external intervention resumes it.
    Escalate { reason: String },
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry { .. })
    }
}

pub trait Decider: Send + Sync {
    fn decide(&self, task: &TaskRecord, failure: &Failure) -> Decision;
}

/// Retry budget and classification policy.
///
/// There is one attempt cap for every failure class; quality gate failures do
/// not get a separate budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-enqueues allowed before a retriable failure escalates.
    pub max_attempts: u32,

    /// Gate stages whose failure is treated as persistent.
    pub non_retriable_stages: HashSet<StageName>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            non_retriable_stages: HashSet::from([StageName::SecurityScan]),
        }
    }
}

impl RetryPolicy {
    pub fn is_retriable(&self, failure: &Failure) -> bool {
        match failure.kind {
            FailureKind::ProducerTransient
            | FailureKind::ProducerTimeout
            | FailureKind::GateTimeout
            | FailureKind::StuckTimeout => true,
            FailureKind::ProducerPermanent => false,
            FailureKind::QualityGate => failure
                .stage
                .is_none_or(|stage| !self.non_retriable_stages.contains(&stage)),
        }
    }
}

/// Attempt-count based decider.
/// - Escalate if the failure is non-retriable
/// - Escalate if attempt_count >= max_attempts
/// - Retry otherwise
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &TaskRecord, failure: &Failure) -> Decision {
        if !self.policy.is_retriable(failure) {
            return Decision::Escalate {
                reason: format!("non-retriable failure ({})", failure.tag()),
            };
        }
        if task.attempt_count >= self.policy.max_attempts {
            return Decision::Escalate {
                reason: format!(
                    "max attempts reached: {}/{}",
                    task.attempt_count, self.policy.max_attempts
                ),
            };
        }
        Decision::Retry {
            reason: format!(
                "retry {}/{} after {}",
                task.attempt_count + 1,
                self.policy.max_attempts,
                failure.tag()
            ),
        }
    }
}
