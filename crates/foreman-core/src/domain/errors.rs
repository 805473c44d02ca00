//! Errors raised by the state store and the producer boundary.

use std::fmt;

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskState;

/// Why a compare-and-set transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Current state differs from the expected one (lost a race).
    StateMismatch,
    /// The requested edge is not part of the transition graph.
    IllegalEdge,
    /// The caller no longer owns the task (it was reclaimed).
    NotOwner,
    /// Moving into `Assigned` without naming an owning worker.
    MissingOwner,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictReason::StateMismatch => "state mismatch",
            ConflictReason::IllegalEdge => "illegal edge",
            ConflictReason::NotOwner => "not owner",
            ConflictReason::MissingOwner => "missing owner",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task already exists: {0}")]
    Duplicate(TaskId),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error(
        "conflict on task {task_id} ({reason}): expected {expected}, found {actual}, requested {requested}"
    )]
    Conflict {
        task_id: TaskId,
        reason: ConflictReason,
        expected: TaskState,
        actual: TaskState,
        requested: TaskState,
    },

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Only an unavailable store stops a worker or the orchestrator; every
    /// other store error is a per-task condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Error reported by the external producer capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    #[error("transient producer error: {0}")]
    Transient(String),

    #[error("permanent producer error: {0}")]
    Permanent(String),
}

impl ProducerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProducerError::Transient(_))
    }
}
