//! Completion reports and cancellation.
//!
//! Each operation reads the task, checks ownership, stages its own
//! transition plus the resulting dependency resolution into one `Batch`, and
//! commits it atomically. A conflicting concurrent write makes the guard
//! fail; the operation then re-reads and re-plans from scratch.

use tracing::{debug, info, warn};

use super::claim::ClaimedTask;
use super::resolver::Batch;
use super::scheduler::{Resolution, Scheduler};
use crate::domain::{
    GraphId, LeaseId, Result, RetryPolicy, TaskId, TaskRecord, TaskStatus, WeftError, WorkerId,
};
use crate::ports::StoreOp;
use crate::ports::clock::{add_std, to_score};

impl Scheduler {
    /// Mark `task` succeeded and release its dependents.
    ///
    /// Only the current lease owner may report. A second success report for
    /// the same task is rejected, so dependents are never released twice.
    pub async fn report_success(
        &self,
        task: TaskId,
        worker: &WorkerId,
        result: Vec<u8>,
    ) -> Result<Resolution> {
        self.finish_success(task, worker, None, result).await
    }

    /// `report_success` for one particular claim; rejected once that claim
    /// was superseded, even by a newer claim of the same worker.
    pub async fn report_claim_success(
        &self,
        claimed: &ClaimedTask,
        result: Vec<u8>,
    ) -> Result<Resolution> {
        self.finish_success(
            claimed.task.id,
            &claimed.lease.owner,
            Some(claimed.lease.id),
            result,
        )
        .await
    }

    async fn finish_success(
        &self,
        task: TaskId,
        worker: &WorkerId,
        held: Option<LeaseId>,
        result: Vec<u8>,
    ) -> Result<Resolution> {
        let key = self.keys.task(task);
        for _ in 0..self.max_conflicts {
            let now = self.now();
            let snapshot = self.load_required(task).await?;
            if !snapshot.record.is_held_by(worker, held) {
                return Err(stale_report(&snapshot.record, worker, "success"));
            }
            let dependents = snapshot.record.dependents.clone();

            let mut batch = Batch::new();
            batch.stage(key.clone(), snapshot);
            batch
                .record_mut(task)
                .ok_or(WeftError::TaskNotFound(task))?
                .succeed(result.clone(), now)?;
            batch.push(StoreOp::remove_sorted(self.keys.leases(), task.to_string()));
            let promoted = self.stage_release(&mut batch, &dependents, now).await?;

            if self.store.transaction(batch.into_ops()?).await? {
                info!(task = %task, %worker, promoted = promoted.len(), "task succeeded");
                return Ok(Resolution {
                    task,
                    status: TaskStatus::Succeeded,
                    promoted,
                    cancelled: Vec::new(),
                });
            }
            debug!(task = %task, "success report conflicted, re-reading");
        }
        Err(self.contention("report_success", key))
    }

    /// Record a failed attempt.
    ///
    /// With retries left the task goes back to pending with a retry time from
    /// `retry`; otherwise it fails and everything downstream is cancelled.
    pub async fn report_failure(
        &self,
        task: TaskId,
        worker: &WorkerId,
        error: impl Into<String>,
        retry: &RetryPolicy,
    ) -> Result<Resolution> {
        self.finish_failure(task, worker, None, error.into(), retry).await
    }

    /// `report_failure` for one particular claim.
    pub async fn report_claim_failure(
        &self,
        claimed: &ClaimedTask,
        error: impl Into<String>,
        retry: &RetryPolicy,
    ) -> Result<Resolution> {
        self.finish_failure(
            claimed.task.id,
            &claimed.lease.owner,
            Some(claimed.lease.id),
            error.into(),
            retry,
        )
        .await
    }

    async fn finish_failure(
        &self,
        task: TaskId,
        worker: &WorkerId,
        held: Option<LeaseId>,
        error: String,
        retry: &RetryPolicy,
    ) -> Result<Resolution> {
        let key = self.keys.task(task);
        for _ in 0..self.max_conflicts {
            let now = self.now();
            let snapshot = self.load_required(task).await?;
            if !snapshot.record.is_held_by(worker, held) {
                return Err(stale_report(&snapshot.record, worker, "failure"));
            }
            let dependents = snapshot.record.dependents.clone();
            let retries_left = snapshot.record.retries_left();
            let attempt = snapshot.record.retry_count + 1;

            let mut batch = Batch::new();
            batch.stage(key.clone(), snapshot);
            batch.push(StoreOp::remove_sorted(self.keys.leases(), task.to_string()));
            let record = batch.record_mut(task).ok_or(WeftError::TaskNotFound(task))?;

            let (status, cancelled) = if retries_left {
                let retry_at = add_std(now, retry.next_delay(attempt));
                record.schedule_retry(error.clone(), retry_at, now)?;
                batch.push(StoreOp::push_sorted(
                    self.keys.retries(),
                    task.to_string(),
                    to_score(retry_at),
                ));
                (TaskStatus::Pending, Vec::new())
            } else {
                record.fail(error.clone(), now)?;
                let cancelled = self.stage_cascade(&mut batch, task, &dependents, now).await?;
                (TaskStatus::Failed, cancelled)
            };

            if self.store.transaction(batch.into_ops()?).await? {
                if status == TaskStatus::Pending {
                    info!(task = %task, %worker, attempt, error = %error, "task failed, retry scheduled");
                } else {
                    warn!(
                        task = %task,
                        %worker,
                        error = %error,
                        cancelled = cancelled.len(),
                        "task failed permanently"
                    );
                }
                return Ok(Resolution {
                    task,
                    status,
                    promoted: Vec::new(),
                    cancelled,
                });
            }
            debug!(task = %task, "failure report conflicted, re-reading");
        }
        Err(self.contention("report_failure", key))
    }

    /// Cancel `task` and everything downstream of it.
    ///
    /// Returns every task this call moved to cancelled; empty if `task` was
    /// already terminal.
    pub async fn cancel(&self, task: TaskId) -> Result<Vec<TaskId>> {
        let key = self.keys.task(task);
        for _ in 0..self.max_conflicts {
            let now = self.now();
            let snapshot = self.load_required(task).await?;
            if snapshot.record.is_terminal() {
                return Ok(Vec::new());
            }
            let prior = snapshot.record.status;
            let dependents = snapshot.record.dependents.clone();

            let mut batch = Batch::new();
            batch.stage(key.clone(), snapshot);
            batch
                .record_mut(task)
                .ok_or(WeftError::TaskNotFound(task))?
                .cancel("cancelled by request".to_string(), now)?;
            batch.push_opt(self.unindex(task, prior));
            let cascaded = self.stage_cascade(&mut batch, task, &dependents, now).await?;

            if self.store.transaction(batch.into_ops()?).await? {
                info!(task = %task, was = %prior, cascaded = cascaded.len(), "task cancelled");
                let mut cancelled = Vec::with_capacity(cascaded.len() + 1);
                cancelled.push(task);
                cancelled.extend(cascaded);
                return Ok(cancelled);
            }
            debug!(task = %task, "cancel conflicted, re-reading");
        }
        Err(self.contention("cancel", key))
    }

    /// Cancel every non-terminal task of a graph. Each task (with its
    /// cascade) is cancelled atomically; the graph as a whole is not.
    pub async fn cancel_graph(&self, graph: GraphId) -> Result<Vec<TaskId>> {
        let record = self.get_graph(graph).await?;
        let mut cancelled = Vec::new();
        for task in record.task_ids {
            cancelled.extend(self.cancel(task).await?);
        }
        info!(graph = %graph, cancelled = cancelled.len(), "graph cancelled");
        Ok(cancelled)
    }
}

fn stale_report(record: &TaskRecord, worker: &WorkerId, kind: &str) -> WeftError {
    warn!(
        task = %record.id,
        %worker,
        status = %record.status,
        owner = record.lease.as_ref().map(|l| l.owner.as_str()),
        kind,
        "rejecting report from stale worker"
    );
    WeftError::OwnershipMismatch {
        task: record.id,
        worker: worker.clone(),
    }
}
