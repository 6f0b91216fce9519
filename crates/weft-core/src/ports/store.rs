//! Store port - the shared coordination store (source of truth).
//!
//! Every cross-worker interaction is expressed with these primitives, so any
//! backend offering them (a distributed cache, an embedded transactional
//! store, a relational engine with row-level CAS) can back the engine.
//!
//! # Design
//! - Values are opaque bytes; the engine serializes records itself.
//! - `transaction` is all-or-nothing: every `Expect` guard is checked first,
//!   and only if all hold are the mutations applied.
//! - Sorted collections order by score, then insertion order, so equal
//!   scores come out FIFO.
//! - `pop_min` is part of the contract, but the claim path does not use it:
//!   a claim reads the queue head and removes it inside a guarded
//!   transaction, so a crash between "pop" and "mark claimed" can never lose
//!   a task.
//!
//! # Beyond the minimal primitive set
//! Two members refine the basic sorted-set primitives so they can take part
//! in transactions:
//! - `range_by_score` is a non-destructive `pop_min`: it reads the head (up
//!   to a score) without removing it. Redis `ZRANGEBYSCORE`, or an indexed
//!   `SELECT ... ORDER BY score LIMIT n`.
//! - `StoreOp::PushSorted` / `StoreOp::RemoveSorted` are `push_sorted` and
//!   the removal half of `pop_min` expressed as transaction steps (`ZADD` /
//!   `ZREM` inside MULTI/EXEC, or row insert/delete in the same SQL
//!   transaction).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Timeouts, dropped connections, failover. Worth retrying.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Anything a retry will not fix.
    #[error("store failure: {0}")]
    Permanent(String),

    /// Transient failures kept happening past the retry budget.
    #[error("store still failing after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// One step of an atomic multi-key transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Guard: `key` currently holds exactly `value` (`None` means absent).
    Expect { key: String, value: Option<Vec<u8>> },

    Put { key: String, value: Vec<u8> },

    /// Insert `member`, or move it to `score` if already present.
    PushSorted {
        collection: String,
        member: String,
        score: i64,
    },

    /// Remove `member` if present.
    RemoveSorted { collection: String, member: String },
}

impl StoreOp {
    pub fn expect(key: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        StoreOp::Expect {
            key: key.into(),
            value,
        }
    }

    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        StoreOp::Put {
            key: key.into(),
            value,
        }
    }

    pub fn push_sorted(collection: impl Into<String>, member: impl Into<String>, score: i64) -> Self {
        StoreOp::PushSorted {
            collection: collection.into(),
            member: member.into(),
            score,
        }
    }

    pub fn remove_sorted(collection: impl Into<String>, member: impl Into<String>) -> Self {
        StoreOp::RemoveSorted {
            collection: collection.into(),
            member: member.into(),
        }
    }
}

/// Atomic key/value + sorted-collection service.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write `new` only if `key` currently holds `expected` (`None` = absent).
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, StoreError>;

    /// Unconditional write that disappears after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration)
    -> Result<(), StoreError>;

    /// Apply `ops` atomically. `Ok(false)` means a guard failed and nothing
    /// was written.
    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<bool, StoreError>;

    async fn push_sorted(&self, collection: &str, member: &str, score: i64)
    -> Result<(), StoreError>;

    /// Remove and return the lowest-scored member, if any.
    async fn pop_min(&self, collection: &str) -> Result<Option<(String, i64)>, StoreError>;

    /// Members with `score <= max_score`, lowest first, at most `limit`.
    /// Nothing is removed; pair with `StoreOp::RemoveSorted` to consume.
    async fn range_by_score(
        &self,
        collection: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, StoreError>;
}
