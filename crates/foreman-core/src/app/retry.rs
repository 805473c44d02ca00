//! Retry/escalation controller.
//!
//! Takes a task sitting in `Failed`, asks the `Decider`, and applies the
//! answer: `Failed -> Pending` plus re-enqueue, or `Failed -> Blocked`.
//! There is no backoff; a retried task waits in the queue like any other.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{Decider, Decision, Failure, StoreError, TaskId, TaskRecord, TaskState, TransitionFields};
use crate::ports::TaskStore;
use crate::queue::TaskQueue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Back in the queue. `attempt_count` is the value after the increment.
    Requeued { attempt_count: u32 },
    Blocked { reason: String },
}

#[derive(Clone)]
pub struct RetryController {
    store: Arc<dyn TaskStore>,
    queue: TaskQueue,
    decider: Arc<dyn Decider>,
}

impl RetryController {
    pub fn new(store: Arc<dyn TaskStore>, queue: TaskQueue, decider: Arc<dyn Decider>) -> Self {
        Self { store, queue, decider }
    }

    /// `task` must be the record as it was just moved into `Failed`.
    pub async fn resolve(&self, task: &TaskRecord, failure: &Failure) -> Result<Resolution, StoreError> {
        match self.decider.decide(task, failure) {
            Decision::Retry { reason } => {
                let record = self
                    .store
                    .transition_task(&task.id, TaskState::Failed, TaskState::Pending, TransitionFields::none())
                    .await?;
                self.enqueue_retry(&task.id).await?;
                info!(
                    task_id = %task.id,
                    attempt = record.attempt_count,
                    %reason,
                    "task requeued"
                );
                Ok(Resolution::Requeued {
                    attempt_count: record.attempt_count,
                })
            }
            Decision::Escalate { reason } => {
                self.store
                    .transition_task(
                        &task.id,
                        TaskState::Failed,
                        TaskState::Blocked,
                        TransitionFields::error(failure.clone()),
                    )
                    .await?;
                warn!(
                    task_id = %task.id,
                    attempt = task.attempt_count,
                    failure = %failure,
                    %reason,
                    "task escalated to BLOCKED"
                );
                Ok(Resolution::Blocked { reason })
            }
        }
    }

    async fn enqueue_retry(&self, id: &TaskId) -> Result<(), StoreError> {
        match self.queue.enqueue(id).await {
            Ok(_) => Ok(()),
            // claimed from a stale entry between the transition and the push
            Err(e) if !e.is_fatal() => {
                warn!(task_id = %id, error = %e, "re-enqueue after retry failed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
