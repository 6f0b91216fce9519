//! Graph submission specs, the persisted graph record and its derived status.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ids::{GraphId, TaskId};
use super::state::TaskStatus;

/// One task in a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub payload: Vec<u8>,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl TaskSpec {
    /// New task with a fresh id.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_id(TaskId::from_ulid(Ulid::new()), payload)
    }

    pub fn with_id(id: TaskId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
            max_retries: 0,
            tags: BTreeSet::new(),
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// `task` waits for `depends_on` to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub task: TaskId,
    pub depends_on: TaskId,
}

/// A graph submission: tasks plus dependency edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub name: String,
    pub tasks: Vec<TaskSpec>,

    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a task and return its id.
    pub fn add_task(&mut self, task: TaskSpec) -> TaskId {
        let id = task.id;
        self.tasks.push(task);
        id
    }

    /// `task` depends on `depends_on`.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.push(Edge { task, depends_on });
    }
}

/// Persisted graph: identity plus membership. Structure is immutable after
/// submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub id: GraphId,
    pub name: String,
    pub task_ids: Vec<TaskId>,
    pub created_at: DateTime<Utc>,
}

/// Graph state (aggregated from tasks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    /// At least one task is not terminal.
    Running,

    /// All tasks succeeded.
    Succeeded,

    /// Everything is terminal and at least one task failed.
    Failed,

    /// Everything is terminal, none failed, some were cancelled.
    Cancelled,
}

impl GraphState {
    pub fn from_statuses(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let mut any_open = false;
        let mut any_failed = false;
        let mut any_cancelled = false;
        for status in statuses {
            match status {
                TaskStatus::Failed => any_failed = true,
                TaskStatus::Cancelled => any_cancelled = true,
                TaskStatus::Succeeded => {}
                _ => any_open = true,
            }
        }
        if any_open {
            GraphState::Running
        } else if any_failed {
            GraphState::Failed
        } else if any_cancelled {
            GraphState::Cancelled
        } else {
            GraphState::Succeeded
        }
    }

    pub fn is_terminal(self) -> bool {
        self != GraphState::Running
    }
}

/// Per-status task counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub ready: usize,
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Ready => self.ready += 1,
            TaskStatus::Claimed => self.claimed += 1,
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.ready + self.claimed + self.succeeded + self.failed + self.cancelled
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

/// Graph status for API responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatus {
    pub graph_id: GraphId,
    pub name: String,
    pub state: GraphState,
    pub counts: StatusCounts,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::domain::state::TaskStatus::*;

    #[rstest]
    #[case::all_succeeded(vec![Succeeded, Succeeded], GraphState::Succeeded)]
    #[case::one_claimed(vec![Succeeded, Claimed], GraphState::Running)]
    #[case::pending_after_failure(vec![Failed, Pending], GraphState::Running)]
    #[case::failed_and_cascaded(vec![Failed, Cancelled, Cancelled], GraphState::Failed)]
    #[case::cancelled_only(vec![Succeeded, Cancelled], GraphState::Cancelled)]
    fn graph_state_from_tasks(#[case] statuses: Vec<TaskStatus>, #[case] expected: GraphState) {
        assert_eq!(GraphState::from_statuses(statuses), expected);
    }

    #[test]
    fn builder_collects_tasks_and_edges() {
        let mut spec = GraphSpec::new("build");
        let a = spec.add_task(TaskSpec::new("a").max_retries(2).tag("lint"));
        let b = spec.add_task(TaskSpec::new("b"));
        spec.add_dependency(b, a);

        assert_eq!(spec.tasks.len(), 2);
        assert_eq!(spec.tasks[0].max_retries, 2);
        assert!(spec.tasks[0].tags.contains("lint"));
        assert_eq!(spec.edges, vec![Edge { task: b, depends_on: a }]);
    }

    #[test]
    fn counts_track_totals() {
        let mut counts = StatusCounts::default();
        for s in [Pending, Ready, Succeeded, Failed, Cancelled] {
            counts.record(s);
        }
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.terminal(), 3);
    }
}
