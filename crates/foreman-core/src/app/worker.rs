//! Worker - pull / execute / report loop.
//!
//! One cycle:
//! 1. dequeue by affinity (idle -> sleep poll interval + jitter)
//! 2. claim `Pending -> Assigned` (conflict -> lost the race, loop)
//! 3. `Assigned -> InProgress`
//! 4. produce, bounded by the producer timeout
//! 5. error -> `InProgress -> Failed`, then the retry controller decides
//! 6. success -> `InProgress -> AwaitingReview`, run the gate pipeline
//!    (bounded by the gate timeout), then `Complete` or `Failed` + retry controller
//!
//! Every transition after the claim carries `owned_by(self)`, so a worker whose
//! task was reclaimed by reconciliation cannot touch it anymore.
//! Only `StoreError::Unavailable` ends the loop; everything else is logged and
//! the worker moves on to the next task.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app::retry::{Resolution, RetryController};
use crate::config::Policy;
use crate::domain::{
    Affinity, Failure, FailureKind, StoreError, TaskId, TaskState, TransitionFields, WorkerId,
    WorkerInfo, WorkerStatus,
};
use crate::error::ForemanError;
use crate::gate::QualityGatePipeline;
use crate::ports::{Producer, TaskStore};
use crate::queue::TaskQueue;

/// Everything a worker needs; shared by all workers of a pool.
pub struct WorkerContext {
    pub store: Arc<dyn TaskStore>,
    pub queue: TaskQueue,
    pub producer: Arc<dyn Producer>,
    pub pipeline: Arc<QualityGatePipeline>,
    pub retry: RetryController,
    pub policy: Policy,
}

/// What one `run_once` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to claim.
    Idle,
    /// Another worker claimed the task first.
    LostRace(TaskId),
    Completed(TaskId),
    Retried { task_id: TaskId, attempt_count: u32 },
    Blocked { task_id: TaskId, reason: String },
    /// A non-fatal store error interrupted the cycle (e.g. the task was
    /// reclaimed mid-flight). Reconciliation repairs whatever is left.
    Abandoned { task_id: TaskId, reason: String },
}

pub struct Worker {
    id: WorkerId,
    affinity: Affinity,
    ctx: Arc<WorkerContext>,
    status: watch::Sender<WorkerStatus>,
}

impl Worker {
    pub fn new(id: WorkerId, affinity: Affinity, ctx: Arc<WorkerContext>) -> Self {
        let (status, _) = watch::channel(WorkerStatus::Idle);
        Self {
            id,
            affinity,
            ctx,
            status,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            worker_id: self.id,
            category_affinity: self.affinity.clone(),
            status: *self.status.borrow(),
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    /// Runs until shutdown is signalled (or the sender is dropped). The cycle in
    /// flight, including its producer call, always finishes first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        info!(worker_id = %self.id, affinity = %self.affinity, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(CycleOutcome::Idle) => {
                    let backoff = idle_backoff(&self.ctx.policy);
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Ok(outcome) => debug!(worker_id = %self.id, ?outcome, "cycle finished"),
                Err(e) if e.is_fatal() => {
                    error!(worker_id = %self.id, error = %e, "worker stopping: state store unavailable");
                    return Err(e);
                }
                Err(e) => warn!(worker_id = %self.id, error = %e, "dequeue failed"),
            }
        }
        info!(worker_id = %self.id, "worker stopped");
        Ok(())
    }

    /// One pull-execute-report cycle.
    pub async fn run_once(&self) -> Result<CycleOutcome, StoreError> {
        let Some(task_id) = self.ctx.queue.dequeue(&self.affinity).await? else {
            return Ok(CycleOutcome::Idle);
        };

        self.status.send_replace(WorkerStatus::Busy);
        let outcome = match self.process(&task_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(worker_id = %self.id, task_id = %task_id, error = %e, "cycle abandoned");
                Ok(CycleOutcome::Abandoned {
                    task_id,
                    reason: e.to_string(),
                })
            }
        };
        self.status.send_replace(WorkerStatus::Idle);
        outcome
    }

    async fn process(&self, task_id: &TaskId) -> Result<CycleOutcome, StoreError> {
        let store = &self.ctx.store;

        match store
            .transition_task(task_id, TaskState::Pending, TaskState::Assigned, TransitionFields::assign(self.id))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(worker_id = %self.id, task_id = %task_id, "lost claim race");
                return Ok(CycleOutcome::LostRace(task_id.clone()));
            }
            Err(e) => return Err(e),
        }

        let record = store
            .transition_task(task_id, TaskState::Assigned, TaskState::InProgress, self.owned())
            .await?;
        info!(
            worker_id = %self.id,
            task_id = %task_id,
            category = %record.category,
            attempt = record.attempt_count,
            "task claimed"
        );

        let limit = self.ctx.policy.producer_timeout;
        let produced = tokio::time::timeout(limit, self.ctx.producer.produce(&record.category, task_id)).await;
        let artifact = match produced {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(e)) => {
                return self.fail(task_id, TaskState::InProgress, Failure::from_producer(&e)).await;
            }
            Err(_) => {
                return self.fail(task_id, TaskState::InProgress, Failure::producer_timeout(limit)).await;
            }
        };

        store
            .transition_task(task_id, TaskState::InProgress, TaskState::AwaitingReview, self.owned())
            .await?;

        let limit = self.ctx.policy.gate_timeout;
        let Ok(report) = tokio::time::timeout(limit, self.ctx.pipeline.run(&artifact)).await else {
            return self.fail(task_id, TaskState::AwaitingReview, Failure::gate_timeout(limit)).await;
        };
        if report.passed() {
            store
                .transition_task(task_id, TaskState::AwaitingReview, TaskState::Complete, self.owned())
                .await?;
            info!(worker_id = %self.id, task_id = %task_id, location = %artifact.location, "task complete");
            return Ok(CycleOutcome::Completed(task_id.clone()));
        }

        let failure = match report.failed_stage() {
            Some(stage) => Failure::quality_gate(stage),
            None => Failure::new(FailureKind::QualityGate, "gate pipeline produced no results"),
        };
        self.fail(task_id, TaskState::AwaitingReview, failure).await
    }

    /// `from -> Failed`, then hand over to the retry controller.
    async fn fail(&self, task_id: &TaskId, from: TaskState, failure: Failure) -> Result<CycleOutcome, StoreError> {
        info!(worker_id = %self.id, task_id = %task_id, failure = %failure, "task failed");
        let failed = self
            .ctx
            .store
            .transition_task(task_id, from, TaskState::Failed, self.owned().with_error(failure.clone()))
            .await?;

        Ok(match self.ctx.retry.resolve(&failed, &failure).await? {
            Resolution::Requeued { attempt_count } => CycleOutcome::Retried {
                task_id: task_id.clone(),
                attempt_count,
            },
            Resolution::Blocked { reason } => CycleOutcome::Blocked {
                task_id: task_id.clone(),
                reason,
            },
        })
    }

    fn owned(&self) -> TransitionFields {
        TransitionFields::none().owned_by(self.id)
    }
}

/// Poll interval plus up to `poll_jitter` of random delay, so idle workers
/// do not poll in lockstep.
fn idle_backoff(policy: &Policy) -> Duration {
    let jitter_ms = policy.poll_jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return policy.poll_interval;
    }
    policy.poll_interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

/// Worker pool handle.
/// - `request_shutdown` で全 worker に停止を通知（実行中の cycle は最後まで走る）
/// - `next_failure` で異常終了した worker を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: JoinSet<(WorkerId, Result<(), StoreError>)>,
    workers: Vec<(WorkerInfo, watch::Receiver<WorkerStatus>)>,
}

impl WorkerGroup {
    pub fn spawn(workers: Vec<Worker>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = JoinSet::new();
        let mut infos = Vec::with_capacity(workers.len());

        for worker in workers {
            infos.push((worker.info(), worker.subscribe_status()));
            let rx = shutdown_rx.clone();
            joins.spawn(async move {
                let id = worker.id();
                (id, worker.run(rx).await)
            });
        }

        Self {
            shutdown_tx,
            joins,
            workers: infos,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Current status of every worker.
    pub fn statuses(&self) -> Vec<WorkerInfo> {
        self.workers
            .iter()
            .map(|(info, status)| WorkerInfo {
                status: *status.borrow(),
                ..info.clone()
            })
            .collect()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Waits until some worker exits abnormally. `None` once every worker has
    /// exited cleanly. Cancel safe.
    pub async fn next_failure(&mut self) -> Option<ForemanError> {
        while let Some(joined) = self.joins.join_next().await {
            match joined {
                Ok((_, Ok(()))) => continue,
                Ok((id, Err(e))) => {
                    error!(worker_id = %id, error = %e, "worker exited with fatal error");
                    return Some(e.into());
                }
                Err(e) => {
                    error!(error = %e, "worker task crashed");
                    return Some(ForemanError::WorkerCrashed(e.to_string()));
                }
            }
        }
        None
    }

    /// Signals shutdown and waits for every worker to finish its current cycle.
    pub async fn shutdown_and_join(mut self) {
        self.request_shutdown();
        while let Some(joined) = self.joins.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => warn!(worker_id = %id, error = %e, "worker exited with error during shutdown"),
                Err(e) => warn!(error = %e, "worker task crashed during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactRef, Category, DefaultDecider, ProducerError, RetryPolicy, TaskRecord};
    use crate::gate::GateChecks;
    use crate::impls::InMemoryTaskStore;
    use crate::domain::ConflictReason;
    use crate::ports::{CheckOutcome, GateCheck, SystemClock, TestOutcome, TestRunner};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ulid::Ulid;

    enum Behavior {
        Succeed,
        Fail(ProducerError),
        Hang,
        /// Reconciliation reclaims the task and `other` picks it up while
        /// the producer is still running.
        ReclaimedMidFlight {
            store: Arc<InMemoryTaskStore>,
            other: WorkerId,
        },
    }

    struct ScriptedProducer {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Producer for ScriptedProducer {
        async fn produce(&self, category: &Category, task_id: &TaskId) -> Result<ArtifactRef, ProducerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => Ok(ArtifactRef::new(task_id.clone(), category.clone(), format!("out/{task_id}"))),
                Behavior::Fail(e) => Err(e.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProducerError::Transient("unreachable".into()))
                }
                Behavior::ReclaimedMidFlight { store, other } => {
                    store
                        .transition_task(task_id, TaskState::InProgress, TaskState::Pending, TransitionFields::none())
                        .await
                        .unwrap();
                    store
                        .transition_task(task_id, TaskState::Pending, TaskState::Assigned, TransitionFields::assign(*other))
                        .await
                        .unwrap();
                    store
                        .transition_task(
                            task_id,
                            TaskState::Assigned,
                            TaskState::InProgress,
                            TransitionFields::none().owned_by(*other),
                        )
                        .await
                        .unwrap();
                    Ok(ArtifactRef::new(task_id.clone(), category.clone(), format!("out/{task_id}")))
                }
            }
        }
    }

    struct RejectingLint;

    #[async_trait]
    impl GateCheck for RejectingLint {
        async fn check(&self, _artifact: &ArtifactRef) -> CheckOutcome {
            CheckOutcome::failed("clippy: 3 warnings")
        }
    }

    struct SlowTests;

    #[async_trait]
    impl TestRunner for SlowTests {
        async fn run_tests(&self, _artifact: &ArtifactRef) -> TestOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            TestOutcome {
                passed: true,
                detail: "ok".into(),
                coverage: 100.0,
            }
        }
    }

    fn test_policy() -> Policy {
        Policy {
            max_attempts: 2,
            stuck_timeout: Duration::from_secs(5),
            orchestrator_interval: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            poll_jitter: Duration::from_millis(5),
            producer_timeout: Duration::from_millis(50),
            gate_timeout: Duration::from_millis(50),
        }
    }

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        worker: Worker,
    }

    fn new_store() -> Arc<InMemoryTaskStore> {
        Arc::new(InMemoryTaskStore::new(Arc::new(SystemClock)))
    }

    async fn fixture(behavior: Behavior, checks: GateChecks, tasks: &[(&str, &str)]) -> Fixture {
        fixture_on(new_store(), behavior, checks, tasks).await
    }

    async fn fixture_on(
        store: Arc<InMemoryTaskStore>,
        behavior: Behavior,
        checks: GateChecks,
        tasks: &[(&str, &str)],
    ) -> Fixture {
        let queue = TaskQueue::new(store.clone());
        for (id, category) in tasks {
            store.create_task((*id).into(), (*category).into()).await.unwrap();
            queue.enqueue(&(*id).into()).await.unwrap();
        }
        let policy = test_policy();
        let decider = Arc::new(DefaultDecider::new(RetryPolicy {
            max_attempts: policy.max_attempts,
            ..RetryPolicy::default()
        }));
        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            queue: queue.clone(),
            producer: Arc::new(ScriptedProducer {
                behavior,
                calls: AtomicUsize::new(0),
            }),
            pipeline: Arc::new(QualityGatePipeline::new(checks, 80.0)),
            retry: RetryController::new(store.clone(), queue.clone(), decider),
            policy,
        });
        let worker = Worker::new(
            WorkerId::from_ulid(Ulid::new()),
            Affinity::new([Category::new("search"), Category::new("media")]),
            ctx,
        );
        Fixture { store, worker }
    }

    async fn task(store: &InMemoryTaskStore, id: &str) -> TaskRecord {
        store.get_task(&id.into()).await.unwrap()
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let f = fixture(Behavior::Succeed, GateChecks::noop(), &[]).await;
        assert_eq!(f.worker.run_once().await.unwrap(), CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn successful_cycle_completes_and_clears_owner() {
        let f = fixture(Behavior::Succeed, GateChecks::noop(), &[("t1", "search")]).await;

        assert_eq!(f.worker.run_once().await.unwrap(), CycleOutcome::Completed("t1".into()));

        let record = task(&f.store, "t1").await;
        assert_eq!(record.state, TaskState::Complete);
        assert!(record.assigned_worker.is_none());
        assert_eq!(record.attempt_count, 0);
        assert_eq!(f.worker.info().status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn transient_error_is_retried() {
        let f = fixture(
            Behavior::Fail(ProducerError::Transient("429".into())),
            GateChecks::noop(),
            &[("t1", "media")],
        )
        .await;

        let outcome = f.worker.run_once().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Retried {
                task_id: "t1".into(),
                attempt_count: 1
            }
        );
        let record = task(&f.store, "t1").await;
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.last_error.map(|e| e.kind), Some(FailureKind::ProducerTransient));
        assert_eq!(f.store.queue_len(&"media".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn permanent_error_blocks() {
        let f = fixture(
            Behavior::Fail(ProducerError::Permanent("bad input".into())),
            GateChecks::noop(),
            &[("t1", "media")],
        )
        .await;

        assert!(matches!(f.worker.run_once().await.unwrap(), CycleOutcome::Blocked { .. }));
        assert_eq!(task(&f.store, "t1").await.state, TaskState::Blocked);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_timeout_is_a_retriable_failure() {
        let f = fixture(Behavior::Hang, GateChecks::noop(), &[("t1", "search")]).await;

        let outcome = f.worker.run_once().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Retried { attempt_count: 1, .. }));
        let record = task(&f.store, "t1").await;
        assert_eq!(record.last_error.map(|e| e.kind), Some(FailureKind::ProducerTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_timeout_fails_the_task_before_it_looks_stuck() {
        let checks = GateChecks {
            test_runner: Arc::new(SlowTests),
            ..GateChecks::noop()
        };
        let f = fixture(Behavior::Succeed, checks, &[("t1", "search")]).await;

        let outcome = f.worker.run_once().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Retried {
                task_id: "t1".into(),
                attempt_count: 1
            }
        );
        let record = task(&f.store, "t1").await;
        assert_eq!(record.state, TaskState::Pending);
        assert!(record.assigned_worker.is_none());
        let failure = record.last_error.unwrap();
        assert_eq!(failure.kind, FailureKind::GateTimeout);
        assert_eq!(failure.tag(), "gate_timeout");
    }

    #[tokio::test]
    async fn gate_failure_records_failing_stage() {
        let checks = GateChecks {
            lint: Arc::new(RejectingLint),
            ..GateChecks::noop()
        };
        let f = fixture(Behavior::Succeed, checks, &[("t1", "search")]).await;

        assert!(matches!(f.worker.run_once().await.unwrap(), CycleOutcome::Retried { .. }));
        let failure = task(&f.store, "t1").await.last_error.unwrap();
        assert_eq!(failure.kind, FailureKind::QualityGate);
        assert_eq!(failure.stage, Some(crate::domain::StageName::Lint));
        assert_eq!(failure.tag(), "quality_gate:lint");
    }

    #[tokio::test]
    async fn task_claimed_elsewhere_is_not_processed() {
        let f = fixture(Behavior::Succeed, GateChecks::noop(), &[("t1", "search")]).await;
        let foreign = WorkerId::from_ulid(Ulid::new());
        f.store
            .transition_task(&"t1".into(), TaskState::Pending, TaskState::Assigned, TransitionFields::assign(foreign))
            .await
            .unwrap();

        // the queue entry is now stale and gets dropped
        assert_eq!(f.worker.run_once().await.unwrap(), CycleOutcome::Idle);
        let record = task(&f.store, "t1").await;
        assert_eq!(record.state, TaskState::Assigned);
        assert_eq!(record.assigned_worker, Some(foreign));
    }

    #[tokio::test]
    async fn reclaimed_task_is_abandoned_by_its_old_owner() {
        let store = new_store();
        let other = WorkerId::from_ulid(Ulid::new());
        let behavior = Behavior::ReclaimedMidFlight {
            store: store.clone(),
            other,
        };
        let f = fixture_on(store, behavior, GateChecks::noop(), &[("t1", "search")]).await;

        let outcome = f.worker.run_once().await.unwrap();

        match outcome {
            CycleOutcome::Abandoned { task_id, reason } => {
                assert_eq!(task_id, TaskId::new("t1"));
                assert!(reason.contains(&ConflictReason::NotOwner.to_string()), "{reason}");
            }
            unexpected => panic!("expected Abandoned, got {unexpected:?}"),
        }
        // the new owner's progress is left untouched
        let record = task(&f.store, "t1").await;
        assert_eq!(record.state, TaskState::InProgress);
        assert_eq!(record.assigned_worker, Some(other));
        assert!(record.last_error.is_none());
        assert_eq!(f.worker.info().status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let f = fixture(Behavior::Succeed, GateChecks::noop(), &[("t1", "search"), ("t2", "media")]).await;
        let (tx, rx) = watch::channel(false);
        let store = f.store.clone();

        let handle = tokio::spawn(f.worker.run(rx));
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let done = store.list_tasks_by_state(TaskState::Complete).await.unwrap().len();
                if done == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn group_reports_statuses_and_joins() {
        let f = fixture(Behavior::Succeed, GateChecks::noop(), &[]).await;
        let group = WorkerGroup::spawn(vec![f.worker]);
        assert_eq!(group.len(), 1);
        assert_eq!(group.statuses()[0].category_affinity.categories().len(), 2);

        tokio::time::timeout(Duration::from_secs(5), group.shutdown_and_join())
            .await
            .unwrap();
    }

    #[test]
    fn backoff_stays_within_jitter_bounds() {
        let policy = test_policy();
        for _ in 0..100 {
            let backoff = idle_backoff(&policy);
            assert!(backoff >= policy.poll_interval);
            assert!(backoff <= policy.poll_interval + policy.poll_jitter);
        }
        let no_jitter = Policy {
            poll_jitter: Duration::ZERO,
            ..test_policy()
        };
        assert_eq!(idle_backoff(&no_jitter), no_jitter.poll_interval);
    }
}
