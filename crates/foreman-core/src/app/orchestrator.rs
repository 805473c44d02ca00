//! Orchestrator loop.
//!
//! Startup: seed the manifest, rebuild the queue, spawn the worker pool.
//! Then, every `orchestrator_interval`:
//! 1. reconcile stuck tasks (`Reaper`)
//! 2. recompute and publish the metrics aggregate
//! 3. stop once every manifest task is `Complete`, or every one that is not
//!    is `Blocked`
//!
//! Workers pull from the queue on their own; the orchestrator never hands a
//! task to a worker directly. All coordination goes through the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::app::reaper::{Reaper, ReconcileReport};
use crate::app::status::{MetricsHandle, MetricsPublisher, compute};
use crate::app::worker::{Worker, WorkerGroup};
use crate::domain::{MetricsAggregate, StoreError, TaskRecord, TaskState, WorkerStatus};
use crate::error::ForemanError;
use crate::manifest::Manifest;
use crate::ports::TaskStore;
use crate::queue::TaskQueue;

/// Why `run` returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Termination {
    /// Every manifest task is `Complete`.
    AllComplete { total: usize },
    /// No further progress is possible; these tasks need external attention.
    Stalled { blocked: Vec<TaskRecord> },
    /// External stop signal.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub reconcile: ReconcileReport,
    pub metrics: MetricsAggregate,
    pub termination: Option<Termination>,
}

pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    queue: TaskQueue,
    reaper: Reaper,
    workers: Vec<Worker>,
    manifest: Manifest,
    interval: Duration,
    metrics: MetricsPublisher,
}

impl Orchestrator {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        queue: TaskQueue,
        reaper: Reaper,
        workers: Vec<Worker>,
        manifest: Manifest,
        interval: Duration,
        metrics: MetricsPublisher,
    ) -> Self {
        Self {
            store,
            queue,
            reaper,
            workers,
            manifest,
            interval,
            metrics,
        }
    }

    /// Read-only view of the aggregate published each cycle.
    pub fn metrics(&self) -> MetricsHandle {
        self.metrics.subscribe()
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Creates every manifest task not already in the store and enqueues it.
    /// Tasks restored from a snapshot keep their state. Returns how many
    /// records were created.
    pub async fn seed(&self) -> Result<usize, ForemanError> {
        self.manifest.validate()?;
        let mut created = 0;
        for entry in &self.manifest.tasks {
            match self.store.get_task(&entry.id).await {
                Ok(existing) => {
                    if existing.category != entry.category {
                        warn!(
                            task_id = %entry.id,
                            stored = %existing.category,
                            manifest = %entry.category,
                            "stored task category differs from manifest; keeping stored record"
                        );
                    }
                }
                Err(StoreError::NotFound(_)) => {
                    self.store
                        .create_task(entry.id.clone(), entry.category.clone())
                        .await?;
                    created += 1;
                }
                Err(e) => return Err(e.into()),
            }
            self.queue.enqueue(&entry.id).await?;
        }
        info!(created, total = self.manifest.len(), "manifest seeded");
        Ok(created)
    }

    /// One orchestrator tick: reconcile, publish metrics, check termination.
    pub async fn cycle(&self) -> Result<CycleReport, StoreError> {
        let reconcile = self.reaper.reconcile().await?;

        let metrics = compute(self.store.as_ref()).await?;
        info!(
            total = metrics.total,
            pending = metrics.pending,
            in_progress = metrics.in_progress,
            complete = metrics.complete,
            blocked = metrics.blocked,
            completion_ratio = metrics.completion_ratio,
            "metrics"
        );
        self.metrics.publish(metrics.clone());

        let termination = self.check_termination().await?;
        Ok(CycleReport {
            reconcile,
            metrics,
            termination,
        })
    }

    async fn check_termination(&self) -> Result<Option<Termination>, StoreError> {
        let ids = self.manifest.ids();
        let complete = self
            .store
            .list_tasks_by_state(TaskState::Complete)
            .await?
            .into_iter()
            .filter(|t| ids.contains(&t.id))
            .count();
        if complete == ids.len() {
            return Ok(Some(Termination::AllComplete { total: ids.len() }));
        }

        let blocked: Vec<TaskRecord> = self
            .store
            .list_tasks_by_state(TaskState::Blocked)
            .await?
            .into_iter()
            .filter(|t| ids.contains(&t.id))
            .collect();
        if !blocked.is_empty() && complete + blocked.len() == ids.len() {
            return Ok(Some(Termination::Stalled { blocked }));
        }
        Ok(None)
    }

    /// Runs until termination, `stop` resolving, or a fatal error. Workers are
    /// always signalled and joined before returning.
    pub async fn run(mut self, stop: impl Future<Output = ()>) -> Result<Termination, ForemanError> {
        self.seed().await?;
        self.queue.rebuild().await?;

        let mut group = WorkerGroup::spawn(std::mem::take(&mut self.workers));
        info!(workers = group.len(), interval_ms = self.interval.as_millis() as u64, "orchestrator started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        let outcome = loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("stop requested");
                    break Ok(Termination::Shutdown);
                }
                Some(err) = group.next_failure() => break Err(err),
                _ = ticker.tick() => {
                    let report = match self.cycle().await {
                        Ok(report) => report,
                        Err(e) => break Err(e.into()),
                    };
                    let busy = group
                        .statuses()
                        .iter()
                        .filter(|w| w.status == WorkerStatus::Busy)
                        .count();
                    debug!(busy, idle = group.len() - busy, "worker pool");
                    if let Some(termination) = report.termination {
                        break Ok(termination);
                    }
                }
            }
        };

        match &outcome {
            Ok(Termination::AllComplete { total }) => info!(total, "all tasks complete"),
            Ok(Termination::Stalled { blocked }) => {
                let ids: Vec<&str> = blocked.iter().map(|t| t.id.as_str()).collect();
                warn!(blocked = ?ids, "no further progress possible; blocked tasks need attention");
            }
            Ok(Termination::Shutdown) => {}
            Err(e) => warn!(error = %e, "orchestrator stopping on fatal error"),
        }

        group.shutdown_and_join().await;
        outcome
    }
}
