//! TaskStore port - task 状態の正本 (source of truth)
//!
//! Holds the task records and the per-category queue lists. Every method is
//! atomic with respect to every other; `transition_task` is the only way a
//! record changes after creation.
//!
//! The queue lists live here (not in `TaskQueue`) so that a queue entry and the
//! record it points at are persisted by the same store. `TaskQueue` adds the
//! PENDING checks on top.

use async_trait::async_trait;

use crate::domain::{Category, StoreError, TaskId, TaskRecord, TaskState, TransitionFields};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Creates a `Pending` record. `Duplicate` if the id exists.
    async fn create_task(&self, id: TaskId, category: Category) -> Result<TaskRecord, StoreError>;

    /// `NotFound` if absent.
    async fn get_task(&self, id: &TaskId) -> Result<TaskRecord, StoreError>;

    /// Compare-and-set. Succeeds only if the current state equals `expected`
    /// and `expected -> new` is an allowed edge; otherwise `Conflict` and the
    /// record is left unchanged. Returns the updated record.
    async fn transition_task(
        &self,
        id: &TaskId,
        expected: TaskState,
        new: TaskState,
        fields: TransitionFields,
    ) -> Result<TaskRecord, StoreError>;

    /// Snapshot read in insertion order.
    async fn list_tasks_by_state(&self, state: TaskState) -> Result<Vec<TaskRecord>, StoreError>;

    /// All records in insertion order.
    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StoreError>;

    /// Appends `id` to the tail of the category list. Returns `false` (and
    /// changes nothing) if the id is already queued anywhere.
    async fn push_queue(&self, category: &Category, id: &TaskId) -> Result<bool, StoreError>;

    /// Pops the head of the category list.
    async fn pop_queue(&self, category: &Category) -> Result<Option<TaskId>, StoreError>;

    async fn queue_len(&self, category: &Category) -> Result<usize, StoreError>;
}
