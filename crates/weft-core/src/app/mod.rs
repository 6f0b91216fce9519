//! App - the scheduling engine.
//!
//! - **dag**: dependency graph and cycle detection for a submission
//! - **submit**: validate and persist a graph
//! - **resolver**: dependency release and failure cascade, staged into one
//!   transaction with the report that caused them
//! - **claim**: claim, heartbeat
//! - **report**: success, failure, cancellation
//! - **reaper_loop**: lease monitor and retry promotion
//! - **status**: read-side queries
//! - **worker_loop**: worker runner driving a `TaskHandler`

pub mod builder;
pub mod claim;
pub mod dag;
pub mod keys;
pub mod reaper_loop;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod status;
pub mod submit;
pub mod worker_loop;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::builder::SchedulerBuilder;
pub use self::claim::ClaimedTask;
pub use self::dag::DependencyGraph;
pub use self::keys::KeySpace;
pub use self::reaper_loop::{LeaseMonitor, MonitorConfig, SweepReport};
pub use self::scheduler::{Resolution, Scheduler, WorkerPresence};
pub use self::submit::validate_graph;
pub use self::worker_loop::{TaskHandler, Worker, WorkerConfig, WorkerGroup, WorkerStats};
