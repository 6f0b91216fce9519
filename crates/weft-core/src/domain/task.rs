//! Task record: the persisted state of one task.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{Result, WeftError};
use super::ids::{GraphId, LeaseId, TaskId, WorkerId};
use super::state::TaskStatus;

/// Ownership grant on a claimed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    pub owner: WorkerId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Metadata + payload for a task in the store.
///
/// Design:
/// - This is the single source of truth for task state; queues only hold ids.
/// - All state transitions go through the methods below, which check the
///   state machine and refuse illegal moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub graph_id: GraphId,

    /// Opaque payload; the engine only looks at its size.
    pub payload: Vec<u8>,

    pub status: TaskStatus,

    /// Tasks that must succeed before this one becomes ready.
    pub dependencies: Vec<TaskId>,

    /// Reverse edges: tasks waiting for this one.
    pub dependents: Vec<TaskId>,

    /// Dependencies that have not succeeded yet.
    pub unsatisfied: u32,

    pub retry_count: u32,
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,

    /// When a pending retry becomes eligible again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,

    /// Last error (failure report, lease expiry, or cancellation reason).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// New record as persisted at submission: ready when it has no
    /// dependencies, pending otherwise.
    pub fn new(
        id: TaskId,
        graph_id: GraphId,
        payload: Vec<u8>,
        dependencies: Vec<TaskId>,
        max_retries: u32,
        tags: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let unsatisfied =
            u32::try_from(dependencies.len()).map_err(|_| WeftError::GraphTooLarge {
                count: dependencies.len(),
                limit: u32::MAX as usize,
            })?;
        let status = if unsatisfied == 0 {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        };
        Ok(Self {
            id,
            graph_id,
            payload,
            status,
            dependencies,
            dependents: Vec::new(),
            unsatisfied,
            retry_count: 0,
            max_retries,
            lease: None,
            retry_at: None,
            result: None,
            error: None,
            tags,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// True when `worker` is the recorded owner of a claimed task.
    pub fn is_owned_by(&self, worker: &WorkerId) -> bool {
        self.is_held_by(worker, None)
    }

    /// Like `is_owned_by`, and when `lease` is given the claim must also
    /// still be that lease. A worker that claims the same task twice only
    /// holds the newer claim.
    pub fn is_held_by(&self, worker: &WorkerId, lease: Option<LeaseId>) -> bool {
        self.status == TaskStatus::Claimed
            && self.lease.as_ref().is_some_and(|l| {
                &l.owner == worker && lease.is_none_or(|id| id == l.id)
            })
    }

    fn transition(&mut self, to: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(WeftError::InvalidTransition {
                task: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Ready -> Claimed.
    pub fn claim(&mut self, lease: Lease, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Claimed, now)?;
        self.lease = Some(lease);
        self.retry_at = None;
        Ok(())
    }

    /// Push the lease expiry forward. Caller has checked ownership.
    pub fn renew(&mut self, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        if let Some(lease) = self.lease.as_mut() {
            lease.expires_at = expires_at;
        }
        self.updated_at = now;
    }

    /// Claimed -> Succeeded.
    pub fn succeed(&mut self, result: Vec<u8>, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Succeeded, now)?;
        self.lease = None;
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    /// Claimed -> Pending, eligible again at `retry_at`.
    pub fn schedule_retry(
        &mut self,
        error: String,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(TaskStatus::Pending, now)?;
        self.lease = None;
        self.retry_count += 1;
        self.retry_at = Some(retry_at);
        self.error = Some(error);
        Ok(())
    }

    /// Claimed -> Ready after the lease ran out.
    pub fn requeue_expired(&mut self, error: String, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Ready, now)?;
        self.lease = None;
        self.retry_count += 1;
        self.error = Some(error);
        Ok(())
    }

    /// Claimed -> Failed (retries exhausted).
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Failed, now)?;
        self.lease = None;
        self.retry_at = None;
        self.error = Some(error);
        Ok(())
    }

    /// Any non-terminal -> Cancelled.
    pub fn cancel(&mut self, reason: String, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Cancelled, now)?;
        self.lease = None;
        self.retry_at = None;
        self.error = Some(reason);
        Ok(())
    }

    /// Pending -> Ready (dependencies met or retry due).
    pub fn promote(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Ready, now)?;
        self.retry_at = None;
        Ok(())
    }

    /// One dependency succeeded. Returns true when this made the task ready.
    pub fn release_dependency(&mut self, now: DateTime<Utc>) -> Result<bool> {
        if self.status != TaskStatus::Pending || self.unsatisfied == 0 {
            return Ok(false);
        }
        self.unsatisfied -= 1;
        self.updated_at = now;
        if self.unsatisfied == 0 && self.retry_at.is_none() {
            self.promote(now)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(deps: Vec<TaskId>, max_retries: u32) -> TaskRecord {
        TaskRecord::new(
            TaskId::from_u128(1),
            GraphId::from_u128(100),
            b"payload".to_vec(),
            deps,
            max_retries,
            BTreeSet::new(),
            now(),
        )
        .unwrap()
    }

    fn lease(owner: &str) -> Lease {
        Lease {
            id: LeaseId::from_u128(7),
            owner: WorkerId::new(owner),
            expires_at: now() + chrono::Duration::seconds(5),
        }
    }

    #[test]
    fn new_record_without_dependencies_is_ready() {
        assert_eq!(record(vec![], 0).status, TaskStatus::Ready);
        let r = record(vec![TaskId::from_u128(2)], 0);
        assert_eq!(r.status, TaskStatus::Pending);
        assert_eq!(r.unsatisfied, 1);
    }

    #[test]
    fn claim_then_succeed_clears_lease() {
        let mut r = record(vec![], 0);
        r.claim(lease("w1"), now()).unwrap();
        assert!(r.is_owned_by(&WorkerId::new("w1")));
        assert!(!r.is_owned_by(&WorkerId::new("w2")));

        r.succeed(b"ok".to_vec(), now()).unwrap();
        assert_eq!(r.status, TaskStatus::Succeeded);
        assert!(r.lease.is_none());
        assert_eq!(r.result.as_deref(), Some(&b"ok"[..]));
    }

    #[test]
    fn reclaimed_task_is_held_only_by_the_newer_lease() {
        let mut r = record(vec![], 1);
        let first = lease("w1");
        r.claim(first.clone(), now()).unwrap();
        assert!(r.is_held_by(&first.owner, Some(first.id)));

        r.requeue_expired("expired".into(), now()).unwrap();
        let second = Lease {
            id: LeaseId::from_u128(8),
            ..lease("w1")
        };
        r.claim(second.clone(), now()).unwrap();

        assert!(r.is_owned_by(&first.owner));
        assert!(!r.is_held_by(&first.owner, Some(first.id)));
        assert!(r.is_held_by(&second.owner, Some(second.id)));
    }

    #[test]
    fn succeed_twice_is_rejected() {
        let mut r = record(vec![], 0);
        r.claim(lease("w1"), now()).unwrap();
        r.succeed(vec![], now()).unwrap();
        let err = r.succeed(vec![], now()).unwrap_err();
        assert!(matches!(err, WeftError::InvalidTransition { .. }));
    }

    #[test]
    fn schedule_retry_counts_attempts() {
        let mut r = record(vec![], 2);
        r.claim(lease("w1"), now()).unwrap();
        r.schedule_retry("boom".into(), now(), now()).unwrap();
        assert_eq!(r.status, TaskStatus::Pending);
        assert_eq!(r.retry_count, 1);
        assert!(r.retries_left());
        assert_eq!(r.error.as_deref(), Some("boom"));
    }

    #[test]
    fn release_dependency_promotes_on_last() {
        let mut r = record(vec![TaskId::from_u128(2), TaskId::from_u128(3)], 0);
        assert!(!r.release_dependency(now()).unwrap());
        assert_eq!(r.status, TaskStatus::Pending);
        assert!(r.release_dependency(now()).unwrap());
        assert_eq!(r.status, TaskStatus::Ready);
        // already ready: no further effect
        assert!(!r.release_dependency(now()).unwrap());
        assert_eq!(r.unsatisfied, 0);
    }

    #[test]
    fn cancel_is_refused_once_terminal() {
        let mut r = record(vec![], 0);
        r.cancel("stop".into(), now()).unwrap();
        assert_eq!(r.status, TaskStatus::Cancelled);
        assert!(r.cancel("again".into(), now()).is_err());
    }

    #[test]
    fn lease_expiry_check() {
        let l = lease("w1");
        assert!(!l.is_expired(now()));
        assert!(l.is_expired(now() + chrono::Duration::seconds(5)));
    }
}
