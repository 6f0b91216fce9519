//! weft - a DAG task queue coordinated entirely through a shared store.
//!
//! Submit a graph of tasks with dependency edges; workers claim ready tasks
//! under time-bound leases, heartbeat while they run, and report results.
//! Success releases dependents, terminal failure cancels everything
//! downstream, and a lease monitor reclaims work from workers that vanished.
//! Workers and schedulers share no memory: every cross-worker step is one
//! atomic operation against the store behind `ports::Store`.
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let scheduler = Arc::new(Scheduler::builder(store).build()?);
//!
//! let mut graph = GraphSpec::new("etl");
//! let extract = graph.add_task(TaskSpec::new("extract"));
//! let load = graph.add_task(TaskSpec::new("load").max_retries(3));
//! graph.add_dependency(load, extract);
//! let graph_id = scheduler.submit_graph(graph).await?;
//!
//! let worker = WorkerId::new("worker-1");
//! if let Some(claimed) = scheduler.claim(&worker, &LeaseConfig::default()).await? {
//!     scheduler.report_success(claimed.task.id, &worker, b"done".to_vec()).await?;
//! }
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    ClaimedTask, LeaseMonitor, MonitorConfig, Resolution, Scheduler, SchedulerBuilder,
    SweepReport, TaskHandler, Worker, WorkerConfig, WorkerGroup, WorkerStats,
};
pub use config::WeftConfig;
pub use domain::{
    Backoff, GraphId, GraphLimits, GraphSpec, GraphState, GraphStatus, LeaseConfig, Result,
    RetryPolicy, TaskId, TaskRecord, TaskSpec, TaskStatus, WeftError, WorkerId,
};
pub use impls::{MemoryStore, RetryingStore, StoreRetryConfig};
pub use ports::{Clock, Store, StoreError, SystemClock};
