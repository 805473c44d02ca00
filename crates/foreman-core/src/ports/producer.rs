//! Producer port - the external capability that does the actual work for a task.

use async_trait::async_trait;

use crate::domain::{ArtifactRef, Category, ProducerError, TaskId};

/// Produces the artifact for one task.
///
/// Must be safe to call again for the same task after a failure; the worker
/// retries through the queue, never inline. The worker wraps each call in the
/// configured timeout, so implementations need no timeout of their own.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, category: &Category, task_id: &TaskId) -> Result<ArtifactRef, ProducerError>;
}
