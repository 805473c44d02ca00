use serde::{Deserialize, Serialize};

use super::ids::{Category, TaskId};

/// Reference to an artifact produced for a task.
///
/// The core never looks inside; it only hands the reference to the gate stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub task_id: TaskId,
    pub category: Category,

    /// Where the producer put the artifact (path, URL, object key, ...).
    pub location: String,
}

impl ArtifactRef {
    pub fn new(task_id: TaskId, category: Category, location: impl Into<String>) -> Self {
        Self {
            task_id,
            category,
            location: location.into(),
        }
    }
}
