//! Claim protocol: claim, heartbeat.
//!
//! # Design
//! - A claim is "read the head of the ready queue, then in one transaction
//!   guarded on the record bytes just read: mark it claimed, remove it from
//!   the queue, index the lease". Two workers racing for the same head both
//!   read the same bytes; only the first transaction's guard holds.
//! - Ready entries whose record is missing or no longer ready are stale and
//!   get removed on sight.
//! - A heartbeat rewrites the record and moves its lease index entry in the
//!   same transaction, so the index always holds the current expiry.
//! - `heartbeat_claim` and the `report_claim_*` calls check the lease id as
//!   well as the worker. A worker running several jobs can hold a stale and
//!   a fresh claim on the same task; only the fresh one counts.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::scheduler::Scheduler;
use crate::domain::{
    Backoff, Lease, LeaseConfig, LeaseId, Result, TaskId, TaskRecord, TaskStatus, WeftError,
    WorkerId,
};
use crate::ports::StoreOp;
use crate::ports::clock::{add_std, to_score};

/// A task now owned by the claiming worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub task: TaskRecord,
    pub lease: Lease,
}

enum Attempt {
    Claimed(ClaimedTask),
    Stale,
    Lost,
}

impl Scheduler {
    /// Claim the oldest eligible ready task for `worker`.
    ///
    /// Returns `Ok(None)` when nothing is eligible; that is not an error.
    pub async fn claim(
        &self,
        worker: &WorkerId,
        lease: &LeaseConfig,
    ) -> Result<Option<ClaimedTask>> {
        let batch = lease.claim_batch.max(1);
        self.promote_due_retries(self.now(), batch).await?;

        for _ in 0..self.max_conflicts {
            let now = self.now();
            let heads = self
                .store
                .range_by_score(&self.keys.ready(), to_score(now), batch)
                .await?;
            if heads.is_empty() {
                return Ok(None);
            }

            for (member, _) in heads {
                match self.try_claim(&member, worker, lease, now).await? {
                    Attempt::Claimed(claimed) => return Ok(Some(claimed)),
                    Attempt::Stale | Attempt::Lost => {}
                }
            }
            debug!(%worker, "every ready head was taken or stale, re-reading queue");
        }
        Err(self.contention("claim", self.keys.ready()))
    }

    async fn try_claim(
        &self,
        member: &str,
        worker: &WorkerId,
        lease: &LeaseConfig,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Attempt> {
        let Ok(id) = member.parse::<TaskId>() else {
            warn!(member, "dropping malformed ready entry");
            self.drop_entry(self.keys.ready(), member, None).await?;
            return Ok(Attempt::Stale);
        };
        let Some(snapshot) = self.load(id).await? else {
            self.drop_entry(self.keys.ready(), member, Some((id, None)))
                .await?;
            return Ok(Attempt::Stale);
        };
        if snapshot.record.status != TaskStatus::Ready {
            debug!(task = %id, status = %snapshot.record.status, "dropping stale ready entry");
            self.drop_entry(self.keys.ready(), member, Some((id, Some(snapshot.raw))))
                .await?;
            return Ok(Attempt::Stale);
        }

        let granted = Lease {
            id: self.ids.lease_id(),
            owner: worker.clone(),
            expires_at: add_std(now, lease.duration),
        };
        let mut record = snapshot.record;
        record.claim(granted.clone(), now)?;

        let key = self.keys.task(id);
        let ops = vec![
            StoreOp::expect(key.clone(), Some(snapshot.raw)),
            StoreOp::put(key, Self::encode(&record)?),
            StoreOp::remove_sorted(self.keys.ready(), member),
            StoreOp::push_sorted(self.keys.leases(), member, to_score(granted.expires_at)),
        ];
        if !self.store.transaction(ops).await? {
            debug!(task = %id, %worker, "lost claim race");
            return Ok(Attempt::Lost);
        }

        info!(task = %id, %worker, lease = %granted.id, "task claimed");
        Ok(Attempt::Claimed(ClaimedTask {
            task: record,
            lease: granted,
        }))
    }

    /// Remove `member` from `collection`, guarded on the task record still
    /// being what we saw (`None` = absent) when a task id is given.
    pub(crate) async fn drop_entry(
        &self,
        collection: String,
        member: &str,
        guard: Option<(TaskId, Option<Vec<u8>>)>,
    ) -> Result<bool> {
        let mut ops = Vec::with_capacity(2);
        if let Some((id, raw)) = guard {
            ops.push(StoreOp::expect(self.keys.task(id), raw));
        }
        ops.push(StoreOp::remove_sorted(collection, member));
        Ok(self.store.transaction(ops).await?)
    }

    /// `claim`, polling with `poll` until something is claimed or `timeout`
    /// elapses.
    pub async fn claim_wait(
        &self,
        worker: &WorkerId,
        lease: &LeaseConfig,
        timeout: Duration,
        poll: &Backoff,
    ) -> Result<Option<ClaimedTask>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempt = 0;
        loop {
            if let Some(claimed) = self.claim(worker, lease).await? {
                return Ok(Some(claimed));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            attempt += 1;
            let delay = poll
                .delay(attempt)
                .max(Duration::from_millis(1))
                .min(deadline - now);
            tokio::time::sleep(delay).await;
        }
    }

    /// Extend the lease of `worker` on `task` to now + `lease.duration`.
    ///
    /// Fails with `LeaseLost` once the task is no longer claimed by `worker`
    /// (reaped, cancelled, or reported by someone else).
    pub async fn heartbeat(
        &self,
        task: TaskId,
        worker: &WorkerId,
        lease: &LeaseConfig,
    ) -> Result<Lease> {
        self.renew(task, worker, None, lease).await
    }

    /// `heartbeat` for one particular claim. Also fails with `LeaseLost`
    /// when the same worker has claimed the task again since.
    pub async fn heartbeat_claim(
        &self,
        claimed: &ClaimedTask,
        lease: &LeaseConfig,
    ) -> Result<Lease> {
        self.renew(
            claimed.task.id,
            &claimed.lease.owner,
            Some(claimed.lease.id),
            lease,
        )
        .await
    }

    async fn renew(
        &self,
        task: TaskId,
        worker: &WorkerId,
        held: Option<LeaseId>,
        lease: &LeaseConfig,
    ) -> Result<Lease> {
        let key = self.keys.task(task);
        for _ in 0..self.max_conflicts {
            let now = self.now();
            let snapshot = self.load_required(task).await?;
            if !snapshot.record.is_held_by(worker, held) {
                return Err(WeftError::LeaseLost {
                    task,
                    worker: worker.clone(),
                });
            }

            let mut record = snapshot.record;
            record.renew(add_std(now, lease.duration), now);
            let renewed = record.lease.clone().ok_or_else(|| WeftError::LeaseLost {
                task,
                worker: worker.clone(),
            })?;
            // the index moves with the record, whether the new expiry is
            // later or earlier than the old one
            let ops = vec![
                StoreOp::expect(key.clone(), Some(snapshot.raw)),
                StoreOp::put(key.clone(), Self::encode(&record)?),
                StoreOp::push_sorted(
                    self.keys.leases(),
                    task.to_string(),
                    to_score(renewed.expires_at),
                ),
            ];
            if self.store.transaction(ops).await? {
                debug!(task = %task, %worker, expires_at = %renewed.expires_at, "lease renewed");
                return Ok(renewed);
            }
        }
        Err(self.contention("heartbeat", key))
    }
}
