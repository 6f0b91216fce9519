//! MemoryStore - in-process implementation of the `Store` port.
//!
//! Reference implementation of the store contract and the test backend.
//! A single `tokio::sync::Mutex` makes every operation (including a whole
//! transaction) indivisible, which is the guarantee a real backend gives via
//! MULTI/EXEC, a serializable transaction, or a server-side script.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::ports::clock::add_std;
use crate::ports::{Clock, Store, StoreError, StoreOp, SystemClock};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// Sorted collection ordered by (score, insertion sequence).
#[derive(Default)]
struct SortedSet {
    ranked: BTreeSet<(i64, u64, String)>,
    members: HashMap<String, (i64, u64)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64, seq: u64) {
        self.remove(member);
        self.ranked.insert((score, seq, member.to_string()));
        self.members.insert(member.to_string(), (score, seq));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.members.remove(member) {
            Some((score, seq)) => {
                self.ranked.remove(&(score, seq, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn pop_first(&mut self) -> Option<(String, i64)> {
        let (score, _, member) = self.ranked.pop_first()?;
        self.members.remove(&member);
        Some((member, score))
    }

    fn range(&self, max_score: i64, limit: usize) -> Vec<(String, i64)> {
        self.ranked
            .iter()
            .take_while(|(score, _, _)| *score <= max_score)
            .take(limit)
            .map(|(score, _, member)| (member.clone(), *score))
            .collect()
    }
}

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, Entry>,
    sorted: HashMap<String, SortedSet>,
    next_seq: u64,
}

impl MemoryState {
    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<&[u8]> {
        self.values
            .get(key)
            .filter(|e| e.expires_at.is_none_or(|at| at > now))
            .map(|e| e.value.as_slice())
    }

    fn put(&mut self, key: String, value: Vec<u8>, expires_at: Option<DateTime<Utc>>) {
        self.values.insert(key, Entry { value, expires_at });
    }

    fn push_sorted(&mut self, collection: &str, member: &str, score: i64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sorted
            .entry(collection.to_string())
            .or_default()
            .insert(member, score, seq);
    }

    fn remove_sorted(&mut self, collection: &str, member: &str) {
        if let Some(set) = self.sorted.get_mut(collection) {
            set.remove(member);
        }
    }
}

/// In-memory store.
///
/// # Example
/// ```ignore
/// let store = MemoryStore::new();
/// store.push_sorted("ready", "task-1", 10).await?;
/// let head = store.range_by_score("ready", i64::MAX, 1).await?;
/// ```
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// TTL expiry follows `clock`, so a `ManualClock` also controls it.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }

    /// Every member of `collection` in rank order.
    pub async fn members(&self, collection: &str) -> Vec<(String, i64)> {
        let state = self.state.lock().await;
        state
            .sorted
            .get(collection)
            .map(|set| set.range(i64::MAX, usize::MAX))
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        Ok(state.live(key, now).map(<[u8]>::to_vec))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.live(key, now) != expected {
            return Ok(false);
        }
        state.put(key.to_string(), new, None);
        Ok(true)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.put(key.to_string(), value, Some(add_std(now, ttl)));
        Ok(())
    }

    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let guards_hold = ops.iter().all(|op| match op {
            StoreOp::Expect { key, value } => state.live(key, now) == value.as_deref(),
            _ => true,
        });
        if !guards_hold {
            return Ok(false);
        }

        for op in ops {
            match op {
                StoreOp::Expect { .. } => {}
                StoreOp::Put { key, value } => state.put(key, value, None),
                StoreOp::PushSorted {
                    collection,
                    member,
                    score,
                } => state.push_sorted(&collection, &member, score),
                StoreOp::RemoveSorted { collection, member } => {
                    state.remove_sorted(&collection, &member)
                }
            }
        }
        Ok(true)
    }

    async fn push_sorted(
        &self,
        collection: &str,
        member: &str,
        score: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.push_sorted(collection, member, score);
        Ok(())
    }

    async fn pop_min(&self, collection: &str) -> Result<Option<(String, i64)>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.sorted.get_mut(collection).and_then(SortedSet::pop_first))
    }

    async fn range_by_score(
        &self,
        collection: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sorted
            .get(collection)
            .map(|set| set.range(max_score, limit))
            .unwrap_or_default())
    }
}
