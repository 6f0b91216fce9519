//! Shared fixtures for engine tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use super::claim::ClaimedTask;
use super::scheduler::Scheduler;
use crate::domain::{GraphSpec, LeaseConfig, TaskId, TaskSpec, TaskStatus, WorkerId};
use crate::impls::MemoryStore;
use crate::ports::{ManualClock, Store};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Scheduler,
    pub lease: LeaseConfig,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let scheduler = Scheduler::builder(store.clone())
            .clock(clock.clone())
            .namespace("test")
            .build()
            .unwrap();
        Self {
            store,
            clock,
            scheduler,
            lease: LeaseConfig::new(Duration::from_secs(5)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use crate::ports::Clock;
        self.clock.now()
    }

    pub fn worker(&self, name: &str) -> WorkerId {
        WorkerId::new(name)
    }

    /// Submit and return the first task's id.
    pub async fn submit(&self, spec: GraphSpec) -> TaskId {
        let first = spec.tasks[0].id;
        self.scheduler.submit_graph(spec).await.unwrap();
        first
    }

    pub async fn claim(&self, worker: &str) -> Option<ClaimedTask> {
        self.scheduler
            .claim(&self.worker(worker), &self.lease)
            .await
            .unwrap()
    }

    pub async fn status_of(&self, task: TaskId) -> TaskStatus {
        self.scheduler.get_task_status(task).await.unwrap()
    }

    /// Insert a raw index entry behind the engine's back.
    pub async fn inject(&self, collection: String, task: TaskId) {
        self.store
            .push_sorted(&collection, &task.to_string(), 0)
            .await
            .unwrap();
    }

    pub async fn ready_members(&self) -> Vec<String> {
        self.members(self.scheduler.keys().ready()).await
    }

    pub async fn lease_members(&self) -> Vec<String> {
        self.members(self.scheduler.keys().leases()).await
    }

    async fn members(&self, collection: String) -> Vec<String> {
        self.store
            .members(&collection)
            .await
            .into_iter()
            .map(|(member, _)| member)
            .collect()
    }
}

pub fn single(name: &str, max_retries: u32) -> GraphSpec {
    let mut spec = GraphSpec::new(name);
    spec.add_task(TaskSpec::new(name).max_retries(max_retries));
    spec
}

/// a -> {b, c} -> d, every task with `max_retries`.
pub fn diamond(max_retries: u32) -> (GraphSpec, [TaskId; 4]) {
    let mut spec = GraphSpec::new("diamond");
    let a = spec.add_task(TaskSpec::new("a").max_retries(max_retries));
    let b = spec.add_task(TaskSpec::new("b").max_retries(max_retries));
    let c = spec.add_task(TaskSpec::new("c").max_retries(max_retries));
    let d = spec.add_task(TaskSpec::new("d").max_retries(max_retries));
    spec.add_dependency(b, a);
    spec.add_dependency(c, a);
    spec.add_dependency(d, b);
    spec.add_dependency(d, c);
    (spec, [a, b, c, d])
}
