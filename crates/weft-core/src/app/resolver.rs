//! Dependency resolution.
//!
//! A report never writes its own record first and resolves dependents later:
//! both are staged into one `Batch` and committed as a single guarded
//! transaction. If any staged record changed since it was read, the guard
//! fails, nothing is written, and the caller re-reads and re-plans. A crash
//! between "task succeeded" and "dependents decremented" is therefore
//! impossible, and a dependent can never be decremented twice for the same
//! dependency.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use super::scheduler::{Scheduler, Snapshot};
use crate::domain::{Result, TaskId, TaskRecord, WeftError};
use crate::ports::StoreOp;
use crate::ports::clock::to_score;

struct Staged {
    key: String,
    raw: Vec<u8>,
    original: TaskRecord,
    record: TaskRecord,
}

/// Records read during planning plus the sorted-set ops that go with them.
#[derive(Default)]
pub(crate) struct Batch {
    staged: HashMap<TaskId, Staged>,
    order: Vec<TaskId>,
    extra: Vec<StoreOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, key: String, snapshot: Snapshot) {
        let id = snapshot.record.id;
        if self.staged.contains_key(&id) {
            return;
        }
        self.order.push(id);
        self.staged.insert(
            id,
            Staged {
                key,
                raw: snapshot.raw,
                original: snapshot.record.clone(),
                record: snapshot.record,
            },
        );
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.staged.contains_key(&id)
    }

    pub fn record_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        self.staged.get_mut(&id).map(|s| &mut s.record)
    }

    pub fn push(&mut self, op: StoreOp) {
        self.extra.push(op);
    }

    pub fn push_opt(&mut self, op: Option<StoreOp>) {
        if let Some(op) = op {
            self.extra.push(op);
        }
    }

    /// One `Expect` per staged record, one `Put` per changed record, then
    /// sorted-set ops.
    pub fn into_ops(mut self) -> Result<Vec<StoreOp>> {
        let mut ops = Vec::with_capacity(self.order.len() * 2 + self.extra.len());
        for id in &self.order {
            let Some(staged) = self.staged.remove(id) else {
                continue;
            };
            let changed = staged.record != staged.original;
            ops.push(StoreOp::expect(staged.key.clone(), Some(staged.raw)));
            if changed {
                ops.push(StoreOp::put(staged.key, Scheduler::encode(&staged.record)?));
            }
        }
        ops.append(&mut self.extra);
        Ok(ops)
    }
}

impl Scheduler {
    /// Read `id` into `batch` unless it is already staged.
    pub(crate) async fn stage_task(&self, batch: &mut Batch, id: TaskId) -> Result<()> {
        if batch.contains(id) {
            return Ok(());
        }
        let snapshot = self.load_required(id).await?;
        batch.stage(self.keys.task(id), snapshot);
        Ok(())
    }

    /// `completed` succeeded: one dependency of each dependent is satisfied.
    /// Dependents reaching zero are promoted and queued in the same batch.
    pub(crate) async fn stage_release(
        &self,
        batch: &mut Batch,
        dependents: &[TaskId],
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskId>> {
        let mut promoted = Vec::new();
        for id in dependents {
            self.stage_task(batch, *id).await?;
            let record = batch.record_mut(*id).ok_or(WeftError::TaskNotFound(*id))?;
            if record.release_dependency(now)? {
                batch.push(StoreOp::push_sorted(
                    self.keys.ready(),
                    id.to_string(),
                    to_score(now),
                ));
                promoted.push(*id);
            }
        }
        Ok(promoted)
    }

    /// `origin` can no longer succeed: cancel everything downstream of it
    /// that is not already terminal, breadth first. The visited set keeps
    /// diamond-shaped graphs from being walked twice.
    pub(crate) async fn stage_cascade(
        &self,
        batch: &mut Batch,
        origin: TaskId,
        dependents: &[TaskId],
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskId>> {
        let mut visited = HashSet::from([origin]);
        let mut queue: VecDeque<TaskId> = dependents.iter().copied().collect();
        let mut cancelled = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            self.stage_task(batch, id).await?;
            let record = batch.record_mut(id).ok_or(WeftError::TaskNotFound(id))?;
            if record.is_terminal() {
                continue;
            }
            let prior = record.status;
            record.cancel(format!("upstream task {origin} did not succeed"), now)?;
            let next = record.dependents.clone();

            batch.push_opt(self.unindex(id, prior));
            cancelled.push(id);
            queue.extend(next);
        }
        Ok(cancelled)
    }
}
