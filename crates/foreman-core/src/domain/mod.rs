//! Domain model (ids, task record, state machine, failures, decisions, gate results).
//!
//! Nothing in here does I/O; the store and the app layer build on these types.

pub mod artifact;
pub mod decision;
pub mod errors;
pub mod failure;
pub mod gate;
pub mod ids;
pub mod metrics;
pub mod state;
pub mod task;
pub mod worker;

pub use artifact::ArtifactRef;
pub use decision::{Decider, Decision, DefaultDecider, RetryPolicy};
pub use errors::{ConflictReason, ProducerError, StoreError};
pub use failure::{Failure, FailureKind};
pub use gate::{GateReport, QualityGateResult, StageName};
pub use ids::{Category, TaskId, WorkerId};
pub use metrics::MetricsAggregate;
pub use state::TaskState;
pub use task::{TaskRecord, TransitionFields};
pub use worker::{Affinity, WorkerInfo, WorkerStatus};
