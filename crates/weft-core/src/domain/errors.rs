//! Errors surfaced by the scheduling engine.
//!
//! Classification:
//! - submission-time validation (`CyclicGraph`, `InvalidReference`, ...): fatal
//!   to that submission, nothing persisted
//! - lease/ownership (`LeaseLost`, `OwnershipMismatch`): the caller is a stale
//!   worker and should drop the task, not a system fault
//! - infrastructure (`StoreUnavailable`, `Store`): fatal to the in-flight
//!   operation only; atomic store operations leave no partial writes

use thiserror::Error;

use super::ids::{GraphId, TaskId, WorkerId};
use super::state::TaskStatus;
use crate::ports::store::StoreError;

#[derive(Debug, Error)]
pub enum WeftError {
    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CyclicGraph { cycle: Vec<TaskId> },

    /// Edge `task -> depends_on` where `missing` (one of the two) is not in
    /// the graph.
    #[error(
        "edge {task} -> {depends_on} references {missing}, which is not part of the submitted graph"
    )]
    InvalidReference {
        task: TaskId,
        depends_on: TaskId,
        missing: TaskId,
    },

    #[error("task {0} appears more than once in the graph")]
    DuplicateTask(TaskId),

    #[error("task {0} already exists in the store")]
    TaskAlreadyExists(TaskId),

    #[error("graph has no tasks")]
    EmptyGraph,

    #[error("graph has {count} tasks, limit is {limit}")]
    GraphTooLarge { count: usize, limit: usize },

    #[error("payload of task {task} is {size} bytes, limit is {limit}")]
    PayloadTooLarge { task: TaskId, size: usize, limit: usize },

    #[error("lease on task {task} is no longer held by {worker}")]
    LeaseLost { task: TaskId, worker: WorkerId },

    #[error("worker {worker} does not own task {task}")]
    OwnershipMismatch { task: TaskId, worker: WorkerId },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("graph not found: {0}")]
    GraphNotFound(GraphId),

    #[error("illegal transition {from:?} -> {to:?} for task {task}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("gave up on {operation} for {key} after {attempts} conflicting updates")]
    Contention {
        operation: &'static str,
        key: String,
        attempts: u32,
    },

    #[error("store unavailable after {attempts} attempts: {source}")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, WeftError>;

impl From<StoreError> for WeftError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Exhausted { attempts, last } => WeftError::StoreUnavailable {
                attempts,
                source: StoreError::Transient(last),
            },
            other => WeftError::Store(other),
        }
    }
}

impl WeftError {
    /// Errors a worker should treat as "stop working on this task".
    pub fn is_lease_loss(&self) -> bool {
        matches!(
            self,
            WeftError::LeaseLost { .. } | WeftError::OwnershipMismatch { .. }
        )
    }
}

fn format_cycle(cycle: &[TaskId]) -> String {
    cycle
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let a = TaskId::from_u128(1);
        let b = TaskId::from_u128(2);
        let err = WeftError::CyclicGraph {
            cycle: vec![a, b, a],
        };
        let msg = err.to_string();
        assert!(msg.contains(&format!("{a} -> {b} -> {a}")));
    }

    #[test]
    fn exhausted_store_maps_to_unavailable() {
        let err: WeftError = StoreError::Exhausted {
            attempts: 3,
            last: "timeout".into(),
        }
        .into();
        assert!(matches!(err, WeftError::StoreUnavailable { attempts: 3, .. }));

        let err: WeftError = StoreError::Permanent("bad".into()).into();
        assert!(matches!(err, WeftError::Store(StoreError::Permanent(_))));
    }

    #[test]
    fn lease_loss_classification() {
        let task = TaskId::from_u128(1);
        let worker = WorkerId::new("w");
        assert!(
            WeftError::LeaseLost {
                task,
                worker: worker.clone()
            }
            .is_lease_loss()
        );
        assert!(WeftError::OwnershipMismatch { task, worker }.is_lease_loss());
        assert!(!WeftError::TaskNotFound(task).is_lease_loss());
    }
}
