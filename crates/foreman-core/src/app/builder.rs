//! OrchestratorBuilder - 構築とワイヤリング
//!
//! Validates the wiring before anything runs (fail-fast): the config must be
//! valid, a producer must be set, and every manifest category must be
//! claimable by at least one worker group.

use std::collections::HashSet;
use std::sync::Arc;

use crate::app::orchestrator::Orchestrator;
use crate::app::reaper::Reaper;
use crate::app::retry::RetryController;
use crate::app::status::metrics_channel;
use crate::app::worker::{Worker, WorkerContext};
use crate::config::{Config, ConfigError};
use crate::domain::{Category, Decider, DefaultDecider};
use crate::gate::{GateChecks, QualityGatePipeline};
use crate::impls::InMemoryTaskStore;
use crate::manifest::{Manifest, ManifestError};
use crate::ports::{Clock, IdGenerator, Producer, SystemClock, TaskStore, UlidGenerator};
use crate::queue::TaskQueue;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("no producer configured")]
    MissingProducer,

    #[error("no worker affinity covers categories {0:?}; these tasks could never be claimed")]
    UnclaimableCategories(Vec<Category>),
}

/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(config, manifest)
///     .store(store)
///     .producer(Arc::new(MyProducer))
///     .checks(checks)
///     .build()?;
/// let termination = orchestrator.run(shutdown_signal()).await?;
/// ```
pub struct OrchestratorBuilder {
    config: Config,
    manifest: Manifest,
    store: Option<Arc<dyn TaskStore>>,
    producer: Option<Arc<dyn Producer>>,
    checks: GateChecks,
    clock: Arc<dyn Clock>,
    id_generator: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
}

impl OrchestratorBuilder {
    pub fn new(config: Config, manifest: Manifest) -> Self {
        Self {
            config,
            manifest,
            store: None,
            producer: None,
            checks: GateChecks::noop(),
            clock: Arc::new(SystemClock),
            id_generator: None,
            decider: None,
        }
    }

    /// Defaults to a fresh in-memory store on the builder's clock.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn producer(mut self, producer: Arc<dyn Producer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Defaults to `GateChecks::noop()`.
    pub fn checks(mut self, checks: GateChecks) -> Self {
        self.checks = checks;
        self
    }

    /// Used by reconciliation (and by the default store). Should be the same
    /// clock the store stamps records with.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    /// Defaults to `DefaultDecider` over the config's retry policy.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.config.validate()?;
        self.manifest.validate()?;
        let producer = self.producer.ok_or(BuildError::MissingProducer)?;

        let claimable = self.config.claimable_categories();
        let unclaimable: Vec<Category> = self
            .manifest
            .categories()
            .into_iter()
            .filter(|c| !claimable.contains(c))
            .collect();
        if !unclaimable.is_empty() {
            return Err(BuildError::UnclaimableCategories(unclaimable));
        }

        let clock = self.clock;
        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryTaskStore::new(clock.clone())),
        };
        let queue = TaskQueue::new(store.clone());
        let decider: Arc<dyn Decider> = match self.decider {
            Some(decider) => decider,
            None => Arc::new(DefaultDecider::new(self.config.retry_policy())),
        };
        let retry = RetryController::new(store.clone(), queue.clone(), decider);
        let policy = self.config.policy();

        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            queue: queue.clone(),
            producer,
            pipeline: Arc::new(QualityGatePipeline::new(self.checks, self.config.gate.min_coverage)),
            retry: retry.clone(),
            policy: policy.clone(),
        });

        let id_generator: Arc<dyn IdGenerator> = match self.id_generator {
            Some(id_generator) => id_generator,
            None => Arc::new(UlidGenerator::new(clock.clone())),
        };
        let mut seen = HashSet::new();
        let mut workers = Vec::with_capacity(self.config.total_workers());
        for group in &self.config.workers {
            for _ in 0..group.count {
                let mut id = id_generator.generate_worker_id();
                while !seen.insert(id) {
                    id = id_generator.generate_worker_id();
                }
                workers.push(Worker::new(id, group.affinity(), ctx.clone()));
            }
        }

        let reaper = Reaper::new(store.clone(), queue.clone(), retry, clock, policy.stuck_timeout);
        let (publisher, _) = metrics_channel();

        Ok(Orchestrator::new(
            store,
            queue,
            reaper,
            workers,
            self.manifest,
            policy.orchestrator_interval,
            publisher,
        ))
    }
}
