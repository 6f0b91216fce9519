//! SchedulerBuilder - wiring of store, clock, ids and limits.
//!
//! Validation happens in `build()` (fail fast), so a misconfigured scheduler
//! never reaches the store.

use std::sync::Arc;

use super::keys::KeySpace;
use super::scheduler::Scheduler;
use crate::domain::{GraphLimits, Result, WeftError};
use crate::ports::{Clock, IdGenerator, Store, SystemClock, UlidGenerator};

/// # Example
/// ```ignore
/// let scheduler = Scheduler::builder(Arc::new(MemoryStore::new()))
///     .namespace("jobs")
///     .clock(clock.clone())
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    store: Arc<dyn Store>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    namespace: String,
    limits: GraphLimits,
    max_conflicts: u32,
}

impl SchedulerBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            clock: None,
            ids: None,
            namespace: KeySpace::default().namespace().to_string(),
            limits: GraphLimits::default(),
            max_conflicts: 16,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to ULIDs stamped with the scheduler's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn limits(mut self, limits: GraphLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn max_conflicts(mut self, attempts: u32) -> Self {
        self.max_conflicts = attempts;
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        if self.namespace.is_empty() || self.namespace.contains(char::is_whitespace) {
            return Err(WeftError::InvalidConfig(format!(
                "namespace {:?} must be non-empty and contain no whitespace",
                self.namespace
            )));
        }
        if self.max_conflicts == 0 {
            return Err(WeftError::InvalidConfig(
                "max_conflicts must be at least 1".into(),
            ));
        }
        if self.limits.max_tasks == 0 || self.limits.max_tasks > u32::MAX as usize {
            return Err(WeftError::InvalidConfig(format!(
                "limits.max_tasks must be between 1 and {}",
                u32::MAX
            )));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        Ok(Scheduler {
            store: self.store,
            clock,
            ids,
            keys: KeySpace::new(self.namespace),
            limits: self.limits,
            max_conflicts: self.max_conflicts,
        })
    }
}

impl Scheduler {
    pub fn builder(store: Arc<dyn Store>) -> SchedulerBuilder {
        SchedulerBuilder::new(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryStore;

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn build_with_defaults() {
        let scheduler = Scheduler::builder(store()).build().unwrap();
        assert_eq!(scheduler.keys().namespace(), "weft");
    }

    #[test]
    fn build_rejects_bad_namespace() {
        let err = Scheduler::builder(store()).namespace("").build().err();
        assert!(matches!(err, Some(WeftError::InvalidConfig(_))));

        let err = Scheduler::builder(store()).namespace("a b").build().err();
        assert!(matches!(err, Some(WeftError::InvalidConfig(_))));
    }

    #[test]
    fn build_rejects_zero_conflict_budget() {
        let err = Scheduler::builder(store()).max_conflicts(0).build().err();
        assert!(matches!(err, Some(WeftError::InvalidConfig(msg)) if msg.contains("max_conflicts")));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn build_rejects_task_limit_beyond_dependency_counter() {
        let limits = GraphLimits {
            max_tasks: u32::MAX as usize + 1,
            ..GraphLimits::default()
        };
        let err = Scheduler::builder(store()).limits(limits).build().err();
        assert!(matches!(err, Some(WeftError::InvalidConfig(msg)) if msg.contains("max_tasks")));
    }
}
