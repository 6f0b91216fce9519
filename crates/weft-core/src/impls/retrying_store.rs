//! RetryingStore - bounded retry of transient store failures.
//!
//! Wraps any `Store`. Transient errors are retried with exponential backoff;
//! once the budget is spent the call fails with `StoreError::Exhausted`,
//! which the engine reports as `WeftError::StoreUnavailable`. Permanent errors
//! are returned immediately.
//!
//! A transaction whose reply was lost may be retried after it was applied.
//! The retry then fails its guards and returns `false`, and the engine
//! re-reads state, so the retry never writes twice.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::policy::Backoff;
use crate::ports::{Store, StoreError, StoreOp};

#[derive(Debug, Clone, PartialEq)]
pub struct StoreRetryConfig {
    /// Total tries per operation, including the first.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(50),
                multiplier: 2.0,
                max: Duration::from_secs(1),
            },
        }
    }
}

pub struct RetryingStore<S> {
    inner: S,
    config: StoreRetryConfig,
}

impl<S: Store> RetryingStore<S> {
    pub fn new(inner: S, config: StoreRetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.config.backoff.delay(attempt);
                    warn!(operation, attempt, ?delay, error = %err, "transient store error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(StoreError::Transient(last)) => {
                    return Err(StoreError::Exhausted { attempts, last });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<S: Store> Store for RetryingStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_retry("get", || self.inner.get(key)).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, StoreError> {
        self.with_retry("compare_and_set", || {
            self.inner.compare_and_set(key, expected, new.clone())
        })
        .await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.with_retry("set_with_ttl", || {
            self.inner.set_with_ttl(key, value.clone(), ttl)
        })
        .await
    }

    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<bool, StoreError> {
        self.with_retry("transaction", || self.inner.transaction(ops.clone()))
            .await
    }

    async fn push_sorted(
        &self,
        collection: &str,
        member: &str,
        score: i64,
    ) -> Result<(), StoreError> {
        self.with_retry("push_sorted", || {
            self.inner.push_sorted(collection, member, score)
        })
        .await
    }

    async fn pop_min(&self, collection: &str) -> Result<Option<(String, i64)>, StoreError> {
        self.with_retry("pop_min", || self.inner.pop_min(collection))
            .await
    }

    async fn range_by_score(
        &self,
        collection: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        self.with_retry("range_by_score", || {
            self.inner.range_by_score(collection, max_score, limit)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls with the given error.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
        error: StoreError,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32, error: StoreError) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicU32::new(failures),
                error,
                calls: AtomicU32::new(0),
            }
        }

        fn trip(&self) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.trip()?;
            self.inner.get(key).await
        }

        async fn compare_and_set(
            &self,
            key: &str,
            expected: Option<&[u8]>,
            new: Vec<u8>,
        ) -> Result<bool, StoreError> {
            self.trip()?;
            self.inner.compare_and_set(key, expected, new).await
        }

        async fn set_with_ttl(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            self.trip()?;
            self.inner.set_with_ttl(key, value, ttl).await
        }

        async fn transaction(&self, ops: Vec<StoreOp>) -> Result<bool, StoreError> {
            self.trip()?;
            self.inner.transaction(ops).await
        }

        async fn push_sorted(
            &self,
            collection: &str,
            member: &str,
            score: i64,
        ) -> Result<(), StoreError> {
            self.trip()?;
            self.inner.push_sorted(collection, member, score).await
        }

        async fn pop_min(&self, collection: &str) -> Result<Option<(String, i64)>, StoreError> {
            self.trip()?;
            self.inner.pop_min(collection).await
        }

        async fn range_by_score(
            &self,
            collection: &str,
            max_score: i64,
            limit: usize,
        ) -> Result<Vec<(String, i64)>, StoreError> {
            self.trip()?;
            self.inner.range_by_score(collection, max_score, limit).await
        }
    }

    fn fast(attempts: u32) -> StoreRetryConfig {
        StoreRetryConfig {
            attempts,
            backoff: Backoff::Fixed {
                delay: Duration::from_millis(1),
            },
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let store = RetryingStore::new(
            FlakyStore::new(2, StoreError::Transient("timeout".into())),
            fast(3),
        );
        assert!(
            store
                .compare_and_set("k", None, b"v".to_vec())
                .await
                .unwrap()
        );
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn exhausted_budget_reports_attempts() {
        let store = RetryingStore::new(
            FlakyStore::new(10, StoreError::Transient("connection reset".into())),
            fast(3),
        );
        let err = store.get("k").await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Exhausted {
                attempts: 3,
                last: "connection reset".into()
            }
        );
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn scheduler_surfaces_exhaustion_as_unavailable() {
        use crate::app::Scheduler;
        use crate::domain::{GraphSpec, TaskId, TaskSpec, WeftError};
        use std::sync::Arc;

        let store = Arc::new(RetryingStore::new(
            FlakyStore::new(u32::MAX, StoreError::Transient("node down".into())),
            fast(3),
        ));
        let scheduler = Scheduler::builder(store.clone()).build().unwrap();

        let mut spec = GraphSpec::new("g");
        spec.add_task(TaskSpec::new("a"));
        let err = scheduler.submit_graph(spec).await.unwrap_err();
        assert!(
            matches!(err, WeftError::StoreUnavailable { attempts: 3, .. }),
            "got {err:?}"
        );

        let err = scheduler.get_task(TaskId::from_u128(1)).await.unwrap_err();
        assert!(matches!(err, WeftError::StoreUnavailable { attempts: 3, .. }));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let store = RetryingStore::new(
            FlakyStore::new(1, StoreError::Permanent("auth".into())),
            fast(5),
        );
        let err = store.range_by_score("q", 0, 1).await.unwrap_err();
        assert_eq!(err, StoreError::Permanent("auth".into()));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 1);
    }
}
