//! Domain model: ids, task/graph records, state machine, policies, errors.

pub mod errors;
pub mod graph;
pub mod ids;
pub mod policy;
pub mod state;
pub mod task;

pub use self::errors::{Result, WeftError};
pub use self::graph::{
    Edge, GraphRecord, GraphSpec, GraphState, GraphStatus, StatusCounts, TaskSpec,
};
pub use self::ids::{GraphId, LeaseId, TaskId, WorkerId};
pub use self::policy::{Backoff, GraphLimits, LeaseConfig, RetryPolicy};
pub use self::state::TaskStatus;
pub use self::task::{Lease, TaskRecord};
