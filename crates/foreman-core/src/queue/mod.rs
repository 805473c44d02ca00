//! Task queue: per-category FIFO of PENDING task ids.
//!
//! Design intent:
//! - The queue holds ids only; the store record stays the source of truth.
//! - Delivery is at-least-once. An entry can go stale (task claimed, reclaimed
//!   or escalated after it was queued), so `dequeue` re-checks the record and
//!   drops anything that is no longer `Pending`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{Affinity, StoreError, TaskId, TaskState};
use crate::ports::TaskStore;

#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Appends the task to the tail of its category queue.
    ///
    /// No-op (returns `false`) unless the task is `Pending` and not already
    /// queued.
    pub async fn enqueue(&self, id: &TaskId) -> Result<bool, StoreError> {
        let record = self.store.get_task(id).await?;
        if record.state != TaskState::Pending {
            debug!(task_id = %id, state = %record.state, "not enqueued: task is not pending");
            return Ok(false);
        }
        let pushed = self.store.push_queue(&record.category, id).await?;
        if pushed {
            debug!(task_id = %id, category = %record.category, "task enqueued");
        }
        Ok(pushed)
    }

    /// Pops the head of the first non-empty queue in affinity order.
    pub async fn dequeue(&self, affinity: &Affinity) -> Result<Option<TaskId>, StoreError> {
        for category in affinity.categories() {
            while let Some(id) = self.store.pop_queue(category).await? {
                match self.store.get_task(&id).await {
                    Ok(record) if record.state == TaskState::Pending => return Ok(Some(id)),
                    Ok(record) => {
                        debug!(task_id = %id, state = %record.state, "dropped stale queue entry");
                    }
                    Err(StoreError::NotFound(_)) => {
                        warn!(task_id = %id, "dropped queue entry for unknown task");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(None)
    }

    /// Re-enqueues every `Pending` task. Idempotent; returns how many entries
    /// were actually added.
    pub async fn rebuild(&self) -> Result<usize, StoreError> {
        let mut added = 0;
        for record in self.store.list_tasks_by_state(TaskState::Pending).await? {
            if self.store.push_queue(&record.category, &record.id).await? {
                added += 1;
            }
        }
        if added > 0 {
            debug!(added, "queue rebuilt from pending tasks");
        }
        Ok(added)
    }
}
