//! Task state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// Allowed edges (everything else is rejected by the store):
/// - Pending -> Assigned -> InProgress -> AwaitingReview -> Complete
/// - InProgress -> Failed, AwaitingReview -> Failed
/// - Failed -> Pending (retry), Failed -> Blocked (escalate)
/// - Assigned / InProgress / AwaitingReview -> Pending (stuck-task reconciliation)
///
/// `Testing` and `Documenting` are representable but have no inbound edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Assigned,
    InProgress,
    AwaitingReview,
    Testing,
    Documenting,
    Complete,
    Blocked,
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 9] = [
        TaskState::Pending,
        TaskState::Assigned,
        TaskState::InProgress,
        TaskState::AwaitingReview,
        TaskState::Testing,
        TaskState::Documenting,
        TaskState::Complete,
        TaskState::Blocked,
        TaskState::Failed,
    ];

    /// States a stuck worker can leave a task in; reconciliation scans these.
    pub const RECLAIMABLE: [TaskState; 3] = [
        TaskState::Assigned,
        TaskState::InProgress,
        TaskState::AwaitingReview,
    ];

    /// No outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Blocked)
    }

    /// Exactly one worker must own a task in these states.
    pub fn requires_owner(self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::InProgress)
    }

    /// Transitions into these states drop the owning worker.
    pub fn clears_owner(self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::Complete | TaskState::Blocked
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, InProgress)
                | (Assigned, Pending)
                | (InProgress, AwaitingReview)
                | (InProgress, Failed)
                | (InProgress, Pending)
                | (AwaitingReview, Complete)
                | (AwaitingReview, Failed)
                | (AwaitingReview, Pending)
                | (Failed, Pending)
                | (Failed, Blocked)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Assigned => "ASSIGNED",
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::AwaitingReview => "AWAITING_REVIEW",
            TaskState::Testing => "TESTING",
            TaskState::Documenting => "DOCUMENTING",
            TaskState::Complete => "COMPLETE",
            TaskState::Blocked => "BLOCKED",
            TaskState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task state: {0}")]
pub struct ParseStateError(String);

impl FromStr for TaskState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Pending, TaskState::Assigned)]
    #[case(TaskState::Assigned, TaskState::InProgress)]
    #[case(TaskState::InProgress, TaskState::AwaitingReview)]
    #[case(TaskState::InProgress, TaskState::Failed)]
    #[case(TaskState::AwaitingReview, TaskState::Complete)]
    #[case(TaskState::AwaitingReview, TaskState::Failed)]
    #[case(TaskState::Failed, TaskState::Pending)]
    #[case(TaskState::Failed, TaskState::Blocked)]
    #[case(TaskState::Assigned, TaskState::Pending)]
    #[case(TaskState::InProgress, TaskState::Pending)]
    #[case(TaskState::AwaitingReview, TaskState::Pending)]
    fn allowed_edges(#[case] from: TaskState, #[case] to: TaskState) {
        assert!(from.can_transition_to(to), "{from} -> {to} should be allowed");
    }

    #[test]
    fn exactly_eleven_edges_exist() {
        let count = TaskState::ALL
            .iter()
            .flat_map(|from| TaskState::ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        assert_eq!(count, 11);
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in TaskState::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TaskState::ALL {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn nothing_leads_into_testing_or_documenting() {
        for from in TaskState::ALL {
            assert!(!from.can_transition_to(TaskState::Testing));
            assert!(!from.can_transition_to(TaskState::Documenting));
        }
    }

    #[test]
    fn serializes_screaming_snake_case() {
        let s = serde_json::to_string(&TaskState::AwaitingReview).unwrap();
        assert_eq!(s, "\"AWAITING_REVIEW\"");
        let back: TaskState = serde_json::from_str("\"IN_PROGRESS\"").unwrap();
        assert_eq!(back, TaskState::InProgress);
    }

    #[rstest]
    #[case("blocked", TaskState::Blocked)]
    #[case("in-progress", TaskState::InProgress)]
    #[case("AWAITING_REVIEW", TaskState::AwaitingReview)]
    fn parses_from_cli_spelling(#[case] input: &str, #[case] expected: TaskState) {
        assert_eq!(input.parse::<TaskState>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_state() {
        assert!("DONE".parse::<TaskState>().is_err());
    }
}
