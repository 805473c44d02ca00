//! App - アプリケーション層
//!
//! Combines the ports into the running system.
//!
//! - **OrchestratorBuilder**: wiring and fail-fast validation
//! - **Orchestrator**: seeding, periodic reconcile / metrics / termination loop
//! - **Worker / WorkerGroup**: pull-execute-report loop
//! - **RetryController**: retry or escalate a failed task
//! - **Reaper**: stuck-task reconciliation
//! - **status**: metrics aggregate publication

pub mod builder;
pub mod orchestrator;
pub mod reaper;
pub mod retry;
pub mod status;
pub mod worker;

pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::orchestrator::{CycleReport, Orchestrator, Termination};
pub use self::reaper::{Reaper, ReconcileReport};
pub use self::retry::{Resolution, RetryController};
pub use self::status::{MetricsHandle, MetricsPublisher, metrics_channel};
pub use self::worker::{CycleOutcome, Worker, WorkerContext, WorkerGroup};
