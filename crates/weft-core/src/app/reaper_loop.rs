//! Lease monitor - reclaim abandoned claims, promote due retries.
//!
//! # Flow
//! 1. Pending tasks whose retry time has come are promoted to ready.
//! 2. Lease index entries with expiry <= now are re-evaluated one by one.
//!    The decision (requeue or fail) is committed in a transaction guarded
//!    on the exact record that was judged expired, so a heartbeat, report or
//!    another monitor that got there first makes the guard fail, and the
//!    entry is re-read instead of being transitioned twice.
//! 3. Entries that no longer describe a live claim are dropped; an entry
//!    behind its record's expiry is moved to that expiry.
//!
//! Any number of monitors can run against one store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::resolver::Batch;
use super::scheduler::Scheduler;
use crate::domain::{Result, RetryPolicy, TaskId, TaskStatus, WeftError};
use crate::ports::StoreOp;
use crate::ports::clock::{add_std, to_score};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Retries that became ready.
    pub promoted: Vec<TaskId>,
    /// Expired claims put back on the ready queue.
    pub requeued: Vec<TaskId>,
    /// Expired claims that ran out of retries.
    pub failed: Vec<TaskId>,
    /// Downstream tasks cancelled because of `failed`.
    pub cancelled: Vec<TaskId>,
    /// Index entries moved to a renewed expiry.
    pub renewed: usize,
    /// Index entries that no longer pointed at a claimed task.
    pub dropped: usize,
    /// Entries left for the next sweep after repeated conflicts.
    pub skipped: usize,
}

impl SweepReport {
    /// Claims taken away from their workers.
    pub fn reaped(&self) -> usize {
        self.requeued.len() + self.failed.len()
    }
}

enum Reaped {
    Requeued(TaskId),
    Failed { task: TaskId, cancelled: Vec<TaskId> },
    Renewed,
    Dropped,
    Skipped,
}

impl Scheduler {
    /// One lease-monitor pass over at most `batch` retries and `batch`
    /// expired leases.
    pub async fn sweep(&self, retry: &RetryPolicy, batch: usize) -> Result<SweepReport> {
        let batch = batch.max(1);
        let now = self.now();
        let mut report = SweepReport {
            promoted: self.promote_due_retries(now, batch).await?,
            ..SweepReport::default()
        };

        let expired = self
            .store
            .range_by_score(&self.keys.leases(), to_score(now), batch)
            .await?;
        for (member, _) in expired {
            match self.reap(&member, retry, now).await? {
                Reaped::Requeued(task) => report.requeued.push(task),
                Reaped::Failed { task, cancelled } => {
                    report.failed.push(task);
                    report.cancelled.extend(cancelled);
                }
                Reaped::Renewed => report.renewed += 1,
                Reaped::Dropped => report.dropped += 1,
                Reaped::Skipped => report.skipped += 1,
            }
        }

        if report.reaped() > 0 {
            warn!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                cancelled = report.cancelled.len(),
                "reclaimed {} expired lease(s)",
                report.reaped()
            );
        }
        Ok(report)
    }

    async fn reap(&self, member: &str, retry: &RetryPolicy, now: DateTime<Utc>) -> Result<Reaped> {
        let Ok(task) = member.parse::<TaskId>() else {
            warn!(member, "dropping malformed lease entry");
            self.drop_entry(self.keys.leases(), member, None).await?;
            return Ok(Reaped::Dropped);
        };
        let key = self.keys.task(task);

        for _ in 0..self.max_conflicts {
            let Some(snapshot) = self.load(task).await? else {
                self.drop_entry(self.keys.leases(), member, Some((task, None)))
                    .await?;
                return Ok(Reaped::Dropped);
            };

            let lease = match (&snapshot.record.status, &snapshot.record.lease) {
                (TaskStatus::Claimed, Some(lease)) => lease.clone(),
                _ => {
                    // reported, cancelled or already reaped
                    if self
                        .drop_entry(self.keys.leases(), member, Some((task, Some(snapshot.raw))))
                        .await?
                    {
                        return Ok(Reaped::Dropped);
                    }
                    continue;
                }
            };

            if !lease.is_expired(now) {
                let ops = vec![
                    StoreOp::expect(key.clone(), Some(snapshot.raw)),
                    StoreOp::push_sorted(self.keys.leases(), member, to_score(lease.expires_at)),
                ];
                if self.store.transaction(ops).await? {
                    return Ok(Reaped::Renewed);
                }
                continue;
            }

            let owner_alive = self.worker_presence(&lease.owner).await?.is_some();
            let reason = format!(
                "lease {} held by {} expired at {} ({})",
                lease.id,
                lease.owner,
                lease.expires_at.to_rfc3339(),
                if owner_alive {
                    "worker alive but not heartbeating"
                } else {
                    "worker gone"
                }
            );
            let dependents = snapshot.record.dependents.clone();
            let retries_left = snapshot.record.retries_left();
            let attempt = snapshot.record.retry_count + 1;

            let mut batch = Batch::new();
            batch.stage(key.clone(), snapshot);
            batch.push(StoreOp::remove_sorted(self.keys.leases(), member));
            let record = batch.record_mut(task).ok_or(WeftError::TaskNotFound(task))?;

            let outcome = if retries_left {
                record.requeue_expired(reason.clone(), now)?;
                let eligible = add_std(now, retry.next_delay(attempt));
                batch.push(StoreOp::push_sorted(
                    self.keys.ready(),
                    member,
                    to_score(eligible),
                ));
                Reaped::Requeued(task)
            } else {
                record.fail(reason.clone(), now)?;
                let cancelled = self.stage_cascade(&mut batch, task, &dependents, now).await?;
                Reaped::Failed { task, cancelled }
            };

            if self.store.transaction(batch.into_ops()?).await? {
                warn!(task = %task, worker = %lease.owner, lease = %lease.id, "{reason}");
                return Ok(outcome);
            }
            debug!(task = %task, "lease re-evaluation conflicted, re-reading");
        }
        debug!(task = %task, "leaving lease entry for the next sweep");
        Ok(Reaped::Skipped)
    }

    /// Promote pending retries that are due. Used by both `claim` and `sweep`.
    pub(crate) async fn promote_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>> {
        let due = self
            .store
            .range_by_score(&self.keys.retries(), to_score(now), limit)
            .await?;
        let mut promoted = Vec::new();
        for (member, _) in due {
            let Ok(task) = member.parse::<TaskId>() else {
                self.drop_entry(self.keys.retries(), &member, None).await?;
                continue;
            };
            let Some(snapshot) = self.load(task).await? else {
                self.drop_entry(self.keys.retries(), &member, Some((task, None)))
                    .await?;
                continue;
            };
            let retry_at = match (&snapshot.record.status, snapshot.record.retry_at) {
                (TaskStatus::Pending, Some(at)) => at,
                _ => {
                    self.drop_entry(self.keys.retries(), &member, Some((task, Some(snapshot.raw))))
                        .await?;
                    continue;
                }
            };
            if retry_at > now {
                continue;
            }

            let key = self.keys.task(task);
            let mut record = snapshot.record;
            record.promote(now)?;
            let ops = vec![
                StoreOp::expect(key.clone(), Some(snapshot.raw)),
                StoreOp::put(key, Self::encode(&record)?),
                StoreOp::remove_sorted(self.keys.retries(), member.as_str()),
                StoreOp::push_sorted(self.keys.ready(), member.as_str(), to_score(retry_at)),
            ];
            // a conflict means someone else promoted or cancelled it
            if self.store.transaction(ops).await? {
                debug!(task = %task, "retry due, task ready");
                promoted.push(task);
            }
        }
        Ok(promoted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Entries examined per sweep.
    pub batch: usize,
    /// Backoff applied to requeued expired claims.
    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Recurring sweep, runnable as a standalone process or beside workers.
pub struct LeaseMonitor {
    scheduler: Arc<Scheduler>,
    config: MonitorConfig,
}

impl LeaseMonitor {
    pub fn new(scheduler: Arc<Scheduler>, config: MonitorConfig) -> Self {
        Self { scheduler, config }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.scheduler
            .sweep(&self.config.retry, self.config.batch)
            .await
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.interval, "lease monitor started");
        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "lease sweep failed");
                    }
                }
            }
        }
        info!("lease monitor stopped");
    }
}
