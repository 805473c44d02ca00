use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{Category, WorkerId};

/// Ordered set of categories a worker may claim. Queues are polled in this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Affinity(Vec<Category>);

impl Affinity {
    /// Builds an affinity, dropping repeated categories but keeping first-seen order.
    pub fn new(categories: impl IntoIterator<Item = Category>) -> Self {
        let mut seen = Vec::new();
        for category in categories {
            if !seen.contains(&category) {
                seen.push(category);
            }
        }
        Self(seen)
    }

    pub fn contains(&self, category: &Category) -> bool {
        self.0.contains(category)
    }

    pub fn categories(&self) -> &[Category] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Category::as_str).collect();
        write!(f, "[{}]", names.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: WorkerId,
    pub category_affinity: Affinity,
    pub status: WorkerStatus,
}
