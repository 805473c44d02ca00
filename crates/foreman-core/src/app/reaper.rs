//! Reaper - 止まった task の回収 (stuck-task reconciliation)
//!
//! Runs once per orchestrator cycle:
//! 1. `Assigned` / `InProgress` / `AwaitingReview` idle longer than the stuck
//!    timeout go back to `Pending` (owner cleared, `last_error = stuck_timeout`)
//!    and are re-enqueued.
//! 2. `Failed` idle longer than the stuck timeout (the worker died between
//!    recording the failure and resolving it) are resolved through the retry
//!    controller using their recorded failure.
//! 3. Every `Pending` task missing from the queue is re-enqueued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::app::retry::RetryController;
use crate::domain::{Failure, FailureKind, StoreError, TaskId, TaskRecord, TaskState, TransitionFields};
use crate::ports::{Clock, TaskStore};
use crate::queue::TaskQueue;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Force-requeued from an in-flight state.
    pub reclaimed: Vec<TaskId>,
    /// Orphaned `Failed` tasks handed to the retry controller.
    pub resolved_failed: Vec<TaskId>,
    /// Queue entries added by the rebuild step.
    pub requeued: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty() && self.resolved_failed.is_empty() && self.requeued == 0
    }
}

pub struct Reaper {
    store: Arc<dyn TaskStore>,
    queue: TaskQueue,
    retry: RetryController,
    clock: Arc<dyn Clock>,
    stuck_timeout: Duration,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: TaskQueue,
        retry: RetryController,
        clock: Arc<dyn Clock>,
        stuck_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            retry,
            clock,
            stuck_timeout,
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let now = self.clock.now();
        let mut report = ReconcileReport::default();

        for state in TaskState::RECLAIMABLE {
            for record in self.store.list_tasks_by_state(state).await? {
                if self.is_stuck(&record, now) && self.reclaim(&record, now).await? {
                    report.reclaimed.push(record.id);
                }
            }
        }

        for record in self.store.list_tasks_by_state(TaskState::Failed).await? {
            if self.is_stuck(&record, now) && self.resolve_orphan(&record, now).await? {
                report.resolved_failed.push(record.id);
            }
        }

        report.requeued = self.queue.rebuild().await?;
        if !report.is_empty() {
            debug!(?report, "reconciliation repaired state");
        }
        Ok(report)
    }

    fn is_stuck(&self, record: &TaskRecord, now: DateTime<Utc>) -> bool {
        // 未来の updated_at (時計の巻き戻り) は stuck 扱いしない
        record
            .idle_for(now)
            .to_std()
            .is_ok_and(|idle| idle > self.stuck_timeout)
    }

    /// `false` when the task moved on since it was listed.
    async fn reclaim(&self, record: &TaskRecord, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let failure = Failure::stuck(record.state, record.idle_for(now));
        let fields = TransitionFields::error(failure);
        match self
            .store
            .transition_task(&record.id, record.state, TaskState::Pending, fields)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_conflict() => return Ok(false),
            Err(e) => return Err(e),
        }
        warn!(
            task_id = %record.id,
            from = %record.state,
            worker_id = ?record.assigned_worker.map(|w| w.to_string()),
            "reclaimed stuck task"
        );
        self.queue.enqueue(&record.id).await?;
        Ok(true)
    }

    async fn resolve_orphan(&self, record: &TaskRecord, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let failure = record.last_error.clone().unwrap_or_else(|| {
            Failure::new(
                FailureKind::StuckTimeout,
                format!("left in FAILED for {}s", record.idle_for(now).num_seconds()),
            )
        });
        match self.retry.resolve(record, &failure).await {
            Ok(resolution) => {
                warn!(task_id = %record.id, ?resolution, "resolved orphaned failed task");
                Ok(true)
            }
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DefaultDecider, RetryPolicy, WorkerId};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use ulid::Ulid;

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryTaskStore>,
        reaper: Reaper,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemoryTaskStore::new(clock.clone()));
        let queue = TaskQueue::new(store.clone());
        let retry = RetryController::new(
            store.clone(),
            queue.clone(),
            Arc::new(DefaultDecider::new(RetryPolicy::default())),
        );
        let reaper = Reaper::new(store.clone(), queue, retry, clock.clone(), Duration::from_secs(900));
        Fixture { clock, store, reaper }
    }

    async fn drive_to(store: &InMemoryTaskStore, id: &str, path: &[TaskState]) -> WorkerId {
        let worker = WorkerId::from_ulid(Ulid::new());
        store.create_task(id.into(), "search".into()).await.unwrap();
        let mut current = TaskState::Pending;
        for &next in path {
            let fields = if next == TaskState::Assigned {
                TransitionFields::assign(worker)
            } else {
                TransitionFields::none()
            };
            store.transition_task(&id.into(), current, next, fields).await.unwrap();
            current = next;
        }
        worker
    }

    #[tokio::test]
    async fn fresh_tasks_are_left_alone() {
        let f = fixture();
        drive_to(&f.store, "t1", &[TaskState::Assigned, TaskState::InProgress]).await;
        f.clock.advance(chrono::Duration::seconds(899));

        let report = f.reaper.reconcile().await.unwrap();

        assert!(report.reclaimed.is_empty());
        assert_eq!(f.store.get_task(&"t1".into()).await.unwrap().state, TaskState::InProgress);
    }

    #[tokio::test]
    async fn stuck_in_flight_tasks_are_reclaimed_and_requeued() {
        let f = fixture();
        drive_to(&f.store, "assigned", &[TaskState::Assigned]).await;
        drive_to(&f.store, "running", &[TaskState::Assigned, TaskState::InProgress]).await;
        drive_to(
            &f.store,
            "reviewing",
            &[TaskState::Assigned, TaskState::InProgress, TaskState::AwaitingReview],
        )
        .await;
        f.clock.advance(chrono::Duration::seconds(901));

        let report = f.reaper.reconcile().await.unwrap();

        assert_eq!(report.reclaimed, vec![TaskId::new("assigned"), TaskId::new("running"), TaskId::new("reviewing")]);
        for id in ["assigned", "running", "reviewing"] {
            let record = f.store.get_task(&id.into()).await.unwrap();
            assert_eq!(record.state, TaskState::Pending);
            assert!(record.assigned_worker.is_none());
            assert_eq!(record.attempt_count, 0);
            assert_eq!(record.last_error.map(|e| e.kind), Some(FailureKind::StuckTimeout));
        }
        assert_eq!(f.store.queue_len(&"search".into()).await.unwrap(), 3);
        // already queued by the reclaim, so the rebuild adds nothing
        assert_eq!(report.requeued, 0);
    }

    #[tokio::test]
    async fn orphaned_failed_task_is_resolved() {
        let f = fixture();
        drive_to(&f.store, "t1", &[TaskState::Assigned, TaskState::InProgress]).await;
        f.store
            .transition_task(
                &"t1".into(),
                TaskState::InProgress,
                TaskState::Failed,
                TransitionFields::error(Failure::new(FailureKind::ProducerTransient, "503")),
            )
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::hours(1));

        let report = f.reaper.reconcile().await.unwrap();

        assert_eq!(report.resolved_failed, vec![TaskId::new("t1")]);
        let record = f.store.get_task(&"t1".into()).await.unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.attempt_count, 1);
    }

    #[tokio::test]
    async fn orphaned_pending_task_is_requeued() {
        let f = fixture();
        f.store.create_task("t1".into(), "search".into()).await.unwrap();

        let report = f.reaper.reconcile().await.unwrap();
        assert_eq!(report.requeued, 1);

        let again = f.reaper.reconcile().await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn terminal_tasks_are_never_touched() {
        let f = fixture();
        drive_to(
            &f.store,
            "done",
            &[TaskState::Assigned, TaskState::InProgress, TaskState::AwaitingReview, TaskState::Complete],
        )
        .await;
        f.clock.advance(chrono::Duration::days(7));

        let report = f.reaper.reconcile().await.unwrap();

        assert!(report.is_empty());
        assert_eq!(f.store.get_task(&"done".into()).await.unwrap().state, TaskState::Complete);
    }
}
