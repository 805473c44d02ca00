//! Task record and the transition rules applied to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ConflictReason, StoreError};
use super::failure::Failure;
use super::ids::{Category, TaskId, WorkerId};
use super::state::TaskState;

/// The unit of orchestrated work.
///
/// Design:
/// - This is the "single source of truth" for task state; queues hold ids only.
/// - Records are never deleted. They end in `Complete` or `Blocked`.
/// - All mutation goes through `apply_transition` (called by the store under its lock).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub category: Category,
    pub state: TaskState,

    /// Incremented exactly on `Failed -> Pending`.
    pub attempt_count: u32,

    pub assigned_worker: Option<WorkerId>,
    pub last_error: Option<Failure>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, category: Category, now: DateTime<Utc>) -> Self {
        Self {
            id,
            category,
            state: TaskState::Pending,
            attempt_count: 0,
            assigned_worker: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Time since the last transition.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }

    /// Compare-and-set. Validates everything first, so a refused transition
    /// leaves the record untouched.
    pub fn apply_transition(
        &mut self,
        expected: TaskState,
        next: TaskState,
        fields: TransitionFields,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conflict = |reason| StoreError::Conflict {
            task_id: self.id.clone(),
            reason,
            expected,
            actual: self.state,
            requested: next,
        };

        if self.state != expected {
            return Err(conflict(ConflictReason::StateMismatch));
        }
        if !expected.can_transition_to(next) {
            return Err(conflict(ConflictReason::IllegalEdge));
        }
        if let Some(owner) = &fields.expected_owner
            && self.assigned_worker.as_ref() != Some(owner)
        {
            return Err(conflict(ConflictReason::NotOwner));
        }
        if next.requires_owner() && fields.assigned_worker.is_none() && self.assigned_worker.is_none() {
            return Err(conflict(ConflictReason::MissingOwner));
        }

        if expected == TaskState::Failed && next == TaskState::Pending {
            self.attempt_count += 1;
        }
        if next.clears_owner() {
            self.assigned_worker = None;
        } else if let Some(worker) = fields.assigned_worker {
            self.assigned_worker = Some(worker);
        }
        if let Some(failure) = fields.last_error {
            self.last_error = Some(failure);
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Optional fields carried by a transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionFields {
    /// New owner; required when moving into `Assigned`.
    pub assigned_worker: Option<WorkerId>,

    /// Failure to record in `last_error`.
    pub last_error: Option<Failure>,

    /// Guard: refuse unless the task is still owned by this worker.
    pub expected_owner: Option<WorkerId>,
}

impl TransitionFields {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn assign(worker: WorkerId) -> Self {
        Self {
            assigned_worker: Some(worker),
            ..Self::default()
        }
    }

    pub fn error(failure: Failure) -> Self {
        Self {
            last_error: Some(failure),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, failure: Failure) -> Self {
        self.last_error = Some(failure);
        self
    }

    pub fn owned_by(mut self, worker: WorkerId) -> Self {
        self.expected_owner = Some(worker);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::failure::FailureKind;
    use rstest::rstest;
    use ulid::Ulid;

    fn record() -> TaskRecord {
        TaskRecord::new(TaskId::new("t1"), Category::new("search"), Utc::now())
    }

    fn worker() -> WorkerId {
        WorkerId::from_ulid(Ulid::new())
    }

    #[test]
    fn new_record_is_pending_and_unowned() {
        let r = record();
        assert_eq!(r.state, TaskState::Pending);
        assert_eq!(r.attempt_count, 0);
        assert!(r.assigned_worker.is_none());
        assert!(r.last_error.is_none());
        assert_eq!(r.created_at, r.updated_at);
    }

    #[test]
    fn claim_sets_owner() {
        let mut r = record();
        let w = worker();
        r.apply_transition(TaskState::Pending, TaskState::Assigned, TransitionFields::assign(w), Utc::now())
            .unwrap();
        assert_eq!(r.state, TaskState::Assigned);
        assert_eq!(r.assigned_worker, Some(w));
    }

    #[test]
    fn claim_without_owner_is_refused() {
        let mut r = record();
        let err = r
            .apply_transition(TaskState::Pending, TaskState::Assigned, TransitionFields::none(), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict { reason: ConflictReason::MissingOwner, requested: TaskState::Assigned, .. }
        ));
        assert!(err.to_string().contains("missing owner"));
        assert_eq!(r.state, TaskState::Pending);
    }

    #[test]
    fn stale_expected_state_conflicts_and_leaves_record_unchanged() {
        let mut r = record();
        let before = r.clone();
        let err = r
            .apply_transition(TaskState::Assigned, TaskState::InProgress, TransitionFields::none(), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict { reason: ConflictReason::StateMismatch, actual: TaskState::Pending, .. }
        ));
        assert_eq!(r, before);
    }

    #[rstest]
    #[case(TaskState::Pending, TaskState::Complete)]
    #[case(TaskState::Pending, TaskState::Blocked)]
    #[case(TaskState::Pending, TaskState::Testing)]
    #[case(TaskState::Pending, TaskState::Failed)]
    fn illegal_edge_conflicts_and_leaves_record_unchanged(#[case] from: TaskState, #[case] to: TaskState) {
        let mut r = record();
        r.state = from;
        let before = r.clone();
        let err = r
            .apply_transition(from, to, TransitionFields::none(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { reason: ConflictReason::IllegalEdge, .. }));
        assert_eq!(r, before);
    }

    #[test]
    fn owner_guard_rejects_other_worker() {
        let mut r = record();
        let w1 = worker();
        let w2 = worker();
        r.apply_transition(TaskState::Pending, TaskState::Assigned, TransitionFields::assign(w1), Utc::now())
            .unwrap();
        let err = r
            .apply_transition(
                TaskState::Assigned,
                TaskState::InProgress,
                TransitionFields::none().owned_by(w2),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { reason: ConflictReason::NotOwner, .. }));
        assert_eq!(r.state, TaskState::Assigned);
    }

    #[test]
    fn retry_increments_attempts_and_clears_owner() {
        let mut r = record();
        let w = worker();
        let now = Utc::now();
        r.apply_transition(TaskState::Pending, TaskState::Assigned, TransitionFields::assign(w), now).unwrap();
        r.apply_transition(TaskState::Assigned, TaskState::InProgress, TransitionFields::none(), now).unwrap();
        let failure = Failure::new(FailureKind::ProducerTransient, "timeout talking to api");
        r.apply_transition(TaskState::InProgress, TaskState::Failed, TransitionFields::error(failure.clone()), now)
            .unwrap();
        assert_eq!(r.attempt_count, 0);
        assert_eq!(r.assigned_worker, Some(w));

        r.apply_transition(TaskState::Failed, TaskState::Pending, TransitionFields::none(), now).unwrap();
        assert_eq!(r.attempt_count, 1);
        assert!(r.assigned_worker.is_none());
        assert_eq!(r.last_error, Some(failure));
    }

    #[test]
    fn reclaim_does_not_count_as_attempt() {
        let mut r = record();
        let now = Utc::now();
        r.apply_transition(TaskState::Pending, TaskState::Assigned, TransitionFields::assign(worker()), now)
            .unwrap();
        r.apply_transition(TaskState::Assigned, TaskState::Pending, TransitionFields::none(), now).unwrap();
        assert_eq!(r.attempt_count, 0);
        assert!(r.assigned_worker.is_none());
    }

    #[test]
    fn transition_stamps_updated_at() {
        let mut r = record();
        let later = r.updated_at + chrono::Duration::seconds(30);
        r.apply_transition(TaskState::Pending, TaskState::Assigned, TransitionFields::assign(worker()), later)
            .unwrap();
        assert_eq!(r.updated_at, later);
        assert_eq!(r.idle_for(later + chrono::Duration::seconds(5)), chrono::Duration::seconds(5));
    }
}
