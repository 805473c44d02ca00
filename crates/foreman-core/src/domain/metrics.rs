use serde::{Deserialize, Serialize};

use super::state::TaskState;
use super::task::TaskRecord;

/// Read-only aggregate over all task records.
///
/// Always derived with `from_tasks`; nothing increments these counters directly.
/// `in_progress` covers every non-terminal state other than `Pending`
/// (including the transient `Failed`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsAggregate {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub complete: usize,
    pub blocked: usize,
    pub completion_ratio: f64,
}

impl MetricsAggregate {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut agg = Self::default();
        for task in tasks {
            agg.total += 1;
            match task.state {
                TaskState::Pending => agg.pending += 1,
                TaskState::Complete => agg.complete += 1,
                TaskState::Blocked => agg.blocked += 1,
                TaskState::Assigned
                | TaskState::InProgress
                | TaskState::AwaitingReview
                | TaskState::Testing
                | TaskState::Documenting
                | TaskState::Failed => agg.in_progress += 1,
            }
        }
        agg.completion_ratio = if agg.total == 0 {
            0.0
        } else {
            agg.complete as f64 / agg.total as f64
        };
        agg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{Category, TaskId};
    use chrono::Utc;

    fn task(id: &str, state: TaskState) -> TaskRecord {
        let mut t = TaskRecord::new(TaskId::new(id), Category::new("search"), Utc::now());
        t.state = state;
        t
    }

    #[test]
    fn empty_aggregate_has_zero_ratio() {
        let agg = MetricsAggregate::from_tasks(&Vec::<TaskRecord>::new());
        assert_eq!(agg, MetricsAggregate::default());
    }

    #[test]
    fn counts_every_state_bucket() {
        let tasks = vec![
            task("a", TaskState::Pending),
            task("b", TaskState::Assigned),
            task("c", TaskState::InProgress),
            task("d", TaskState::AwaitingReview),
            task("e", TaskState::Failed),
            task("f", TaskState::Complete),
            task("g", TaskState::Complete),
            task("h", TaskState::Blocked),
        ];
        let agg = MetricsAggregate::from_tasks(&tasks);
        assert_eq!(agg.total, 8);
        assert_eq!(agg.pending, 1);
        assert_eq!(agg.in_progress, 4);
        assert_eq!(agg.complete, 2);
        assert_eq!(agg.blocked, 1);
        assert!((agg.completion_ratio - 0.25).abs() < f64::EPSILON);
    }
}
