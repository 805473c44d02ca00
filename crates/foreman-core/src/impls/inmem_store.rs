//! In-memory task store.
//!
//! One `tokio::sync::Mutex` guards records and queue lists together, so every
//! trait method is a single critical section. That lock is what makes
//! `transition_task` a true compare-and-set across workers.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{Category, StoreError, TaskId, TaskRecord, TaskState, TransitionFields};
use crate::impls::snapshot::Snapshot;
use crate::ports::{Clock, TaskStore};

#[derive(Default)]
struct StoreState {
    /// Insertion order.
    tasks: Vec<TaskRecord>,

    /// TaskId -> position in `tasks`.
    index: HashMap<TaskId, usize>,

    /// Per-category FIFO lists (TaskIds only).
    queues: HashMap<Category, VecDeque<TaskId>>,

    /// Every id currently sitting in some queue list.
    queued: HashSet<TaskId>,
}

impl StoreState {
    /// Rebuilds state from a snapshot. Records in `Testing` / `Documenting`
    /// are refused: no edge leads out of them, so the run could never finish.
    fn from_snapshot(snapshot: Snapshot, path: &Path) -> Result<Self, StoreError> {
        let mut state = Self::default();
        for task in snapshot.tasks {
            if state.index.contains_key(&task.id) {
                continue;
            }
            if matches!(task.state, TaskState::Testing | TaskState::Documenting) {
                return Err(StoreError::Unavailable(format!(
                    "{}: task {} is in {}, which this store cannot resume",
                    path.display(),
                    task.id,
                    task.state
                )));
            }
            state.index.insert(task.id.clone(), state.tasks.len());
            state.tasks.push(task);
        }
        for (category, ids) in snapshot.queues {
            for id in ids {
                if state.index.contains_key(&id) && state.queued.insert(id.clone()) {
                    state.queues.entry(category.clone()).or_default().push_back(id);
                }
            }
        }
        Ok(state)
    }

    fn to_snapshot(&self) -> Snapshot {
        let queues = self
            .queues
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(category, ids)| (category.clone(), ids.iter().cloned().collect()))
            .collect::<BTreeMap<_, _>>();
        Snapshot::new(self.tasks.clone(), queues)
    }

    fn position(&self, id: &TaskId) -> Result<usize, StoreError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

/// Mutex-guarded store, optionally persisted to a JSON snapshot.
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryTaskStore {
    /// Purely in-memory; nothing survives the process.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
            snapshot_path: None,
        }
    }

    /// Opens a store persisted at `path`, loading the existing snapshot if any.
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match Snapshot::load(&path).await? {
            Some(snapshot) => {
                debug!(path = %path.display(), tasks = snapshot.tasks.len(), "loaded store snapshot");
                StoreState::from_snapshot(snapshot, &path)?
            }
            None => StoreState::default(),
        };
        Ok(Self {
            state: Mutex::new(state),
            clock,
            snapshot_path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Called with the lock held so snapshots are written in mutation order.
    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        match &self.snapshot_path {
            Some(path) => state.to_snapshot().write_atomic(path).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, id: TaskId, category: Category) -> Result<TaskRecord, StoreError> {
        let mut state = self.state.lock().await;
        if state.index.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        let record = TaskRecord::new(id.clone(), category, self.clock.now());
        let pos = state.tasks.len();
        state.tasks.push(record.clone());
        state.index.insert(id, pos);
        self.persist(&state).await?;
        debug!(task_id = %record.id, category = %record.category, "task created");
        Ok(record)
    }

    async fn get_task(&self, id: &TaskId) -> Result<TaskRecord, StoreError> {
        let state = self.state.lock().await;
        let pos = state.position(id)?;
        Ok(state.tasks[pos].clone())
    }

    async fn transition_task(
        &self,
        id: &TaskId,
        expected: TaskState,
        new: TaskState,
        fields: TransitionFields,
    ) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let pos = state.position(id)?;
        let record = &mut state.tasks[pos];
        record.apply_transition(expected, new, fields, now)?;
        let updated = record.clone();
        self.persist(&state).await?;
        debug!(
            task_id = %id,
            from = %expected,
            to = %new,
            attempt = updated.attempt_count,
            "task transitioned"
        );
        Ok(updated)
    }

    async fn list_tasks_by_state(&self, state: TaskState) -> Result<Vec<TaskRecord>, StoreError> {
        let guard = self.state.lock().await;
        Ok(guard.tasks.iter().filter(|t| t.state == state).cloned().collect())
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.state.lock().await.tasks.clone())
    }

    async fn push_queue(&self, category: &Category, id: &TaskId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.queued.insert(id.clone()) {
            return Ok(false);
        }
        state.queues.entry(category.clone()).or_default().push_back(id.clone());
        self.persist(&state).await?;
        Ok(true)
    }

    async fn pop_queue(&self, category: &Category) -> Result<Option<TaskId>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(id) = state.queues.get_mut(category).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        state.queued.remove(&id);
        self.persist(&state).await?;
        Ok(Some(id))
    }

    async fn queue_len(&self, category: &Category) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state.queues.get(category).map_or(0, VecDeque::len))
    }
}
