//! Scheduler - the worker-facing API.
//!
//! Every operation is a read of the store followed by one guarded
//! transaction (or compare-and-set). Nothing authoritative is kept in
//! process memory, so any number of schedulers and workers can share a store.
//!
//! The operations themselves live next to their component:
//! - `submit`: `submit_graph`
//! - `claim`: `claim`, `claim_wait`, `heartbeat`, `heartbeat_claim`
//! - `report`: `report_success`, `report_failure`, their `report_claim_*`
//!   forms, `cancel`, `cancel_graph`
//! - `reaper_loop`: `sweep`
//! - `status`: `get_task`, `get_task_status`, `get_graph`, `list_graph_tasks`,
//!   `get_graph_status`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::keys::KeySpace;
use crate::domain::{GraphLimits, Result, TaskId, TaskRecord, TaskStatus, WeftError, WorkerId};
use crate::ports::{Clock, IdGenerator, Store, StoreOp};

pub struct Scheduler {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) keys: KeySpace,
    pub(crate) limits: GraphLimits,
    /// Optimistic attempts per operation before giving up with `Contention`.
    pub(crate) max_conflicts: u32,
}

/// A task record together with the exact bytes it was read as. The bytes
/// are the guard of any later write.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub raw: Vec<u8>,
    pub record: TaskRecord,
}

/// Effect of a completion, failure or cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub task: TaskId,
    /// Status of `task` after the operation.
    pub status: TaskStatus,
    /// Dependents that became ready in this pass.
    pub promoted: Vec<TaskId>,
    /// Dependents cancelled by the cascade.
    pub cancelled: Vec<TaskId>,
}

/// Liveness record a worker refreshes while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPresence {
    pub worker: WorkerId,
    pub running: usize,
    pub seen_at: DateTime<Utc>,
}

impl Scheduler {
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub(crate) async fn load(&self, id: TaskId) -> Result<Option<Snapshot>> {
        let Some(raw) = self.store.get(&self.keys.task(id)).await? else {
            return Ok(None);
        };
        let record: TaskRecord = serde_json::from_slice(&raw)?;
        Ok(Some(Snapshot { raw, record }))
    }

    pub(crate) async fn load_required(&self, id: TaskId) -> Result<Snapshot> {
        self.load(id).await?.ok_or(WeftError::TaskNotFound(id))
    }

    /// Error for an operation whose every optimistic attempt conflicted.
    pub(crate) fn contention(&self, operation: &'static str, key: String) -> WeftError {
        debug!(operation, %key, attempts = self.max_conflicts, "optimistic retries exhausted");
        WeftError::Contention {
            operation,
            key,
            attempts: self.max_conflicts,
        }
    }

    /// Remove `id` from whichever collection indexes a task in `status`.
    pub(crate) fn unindex(&self, id: TaskId, status: TaskStatus) -> Option<StoreOp> {
        let collection = match status {
            TaskStatus::Ready => self.keys.ready(),
            TaskStatus::Claimed => self.keys.leases(),
            TaskStatus::Pending => self.keys.retries(),
            _ => return None,
        };
        Some(StoreOp::remove_sorted(collection, id.to_string()))
    }

    /// Publish that `worker` is alive, running `running` jobs.
    pub async fn publish_presence(
        &self,
        worker: &WorkerId,
        running: usize,
        ttl: std::time::Duration,
    ) -> Result<()> {
        let presence = WorkerPresence {
            worker: worker.clone(),
            running,
            seen_at: self.now(),
        };
        self.store
            .set_with_ttl(&self.keys.worker(worker), Self::encode(&presence)?, ttl)
            .await?;
        Ok(())
    }

    pub async fn worker_presence(&self, worker: &WorkerId) -> Result<Option<WorkerPresence>> {
        match self.store.get(&self.keys.worker(worker)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}
