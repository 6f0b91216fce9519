//! Task state machine.

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Pending -> Ready            (all dependencies succeeded, or a retry came due)
/// - Ready -> Claimed            (atomic claim by a worker)
/// - Claimed -> Succeeded        (success report)
/// - Claimed -> Pending | Failed (failure report; Pending while retries remain)
/// - Claimed -> Ready | Failed   (lease expired; Ready while retries remain)
/// - non-terminal -> Cancelled   (explicit cancel or cascade)
///
/// Succeeded, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Claimed,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Ready) => true,
            (Ready, Claimed) => true,
            (Claimed, Succeeded | Pending | Failed | Ready) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
