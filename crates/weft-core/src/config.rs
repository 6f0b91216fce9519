//! File-level configuration.
//!
//! Every section and field is optional; missing values take the defaults
//! below. Durations are integer milliseconds.
//!
//! ```toml
//! [store]
//! namespace = "weft"
//!
//! [lease]
//! duration_ms = 30000
//!
//! [retry]
//! default_max_retries = 3
//! backoff = { kind = "exponential", base_ms = 2000, multiplier = 2.0, max_ms = 300000 }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::app::{MonitorConfig, WorkerConfig};
use crate::domain::{Backoff, GraphLimits, LeaseConfig, Result, RetryPolicy, WeftError, WorkerId};
use crate::impls::StoreRetryConfig;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeftConfig {
    pub store: StoreSection,
    pub lease: LeaseSection,
    pub retry: RetrySection,
    pub monitor: MonitorSection,
    pub worker: WorkerSection,
    pub limits: LimitsSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub namespace: String,
    /// Tries per store call before giving up, including the first.
    pub op_attempts: u32,
    pub op_retry_base_ms: u64,
    pub op_retry_max_ms: u64,
    /// Optimistic attempts per engine operation.
    pub max_conflicts: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            namespace: "weft".into(),
            op_attempts: 4,
            op_retry_base_ms: 50,
            op_retry_max_ms: 1_000,
            max_conflicts: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaseSection {
    pub duration_ms: u64,
    pub claim_batch: usize,
}

impl Default for LeaseSection {
    fn default() -> Self {
        Self {
            duration_ms: 30_000,
            claim_batch: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    /// Applied to tasks that do not set their own `max_retries`.
    pub default_max_retries: u32,
    pub backoff: BackoffSection,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            backoff: BackoffSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    None,
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSection {
    pub kind: BackoffKind,
    /// Fixed delay, linear base, or exponential base.
    pub base_ms: u64,
    /// Linear increment per retry.
    pub step_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_ms: 2_000,
            step_ms: 2_000,
            multiplier: 2.0,
            max_ms: 300_000,
        }
    }
}

impl BackoffSection {
    pub fn to_backoff(&self) -> Backoff {
        let base = Duration::from_millis(self.base_ms);
        match self.kind {
            BackoffKind::None => Backoff::None,
            BackoffKind::Fixed => Backoff::Fixed { delay: base },
            BackoffKind::Linear => Backoff::Linear {
                base,
                step: Duration::from_millis(self.step_ms),
            },
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                multiplier: self.multiplier,
                max: Duration::from_millis(self.max_ms),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSection {
    pub interval_ms: u64,
    pub batch: usize,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            batch: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    pub max_jobs: usize,
    pub poll_interval_ms: u64,
    pub presence_ttl_ms: u64,
    /// Run lease sweeps inside every worker.
    pub sweep: bool,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_jobs: 8,
            poll_interval_ms: 2_000,
            presence_ttl_ms: 10_000,
            sweep: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsSection {
    pub max_tasks: usize,
    pub max_payload_bytes: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let limits = GraphLimits::default();
        Self {
            max_tasks: limits.max_tasks,
            max_payload_bytes: limits.max_payload_bytes,
        }
    }
}

impl WeftConfig {
    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &str); 9] = [
            (!self.store.namespace.trim().is_empty(), "store.namespace must not be empty"),
            (self.store.op_attempts >= 1, "store.op_attempts must be at least 1"),
            (self.store.max_conflicts >= 1, "store.max_conflicts must be at least 1"),
            (self.lease.duration_ms > 0, "lease.duration_ms must be positive"),
            (self.lease.claim_batch >= 1, "lease.claim_batch must be at least 1"),
            (self.monitor.interval_ms > 0, "monitor.interval_ms must be positive"),
            (self.worker.max_jobs >= 1, "worker.max_jobs must be at least 1"),
            (
                self.limits.max_tasks >= 1 && self.limits.max_tasks <= u32::MAX as usize,
                "limits.max_tasks must be between 1 and 4294967295",
            ),
            (
                self.retry.backoff.kind != BackoffKind::Exponential
                    || (self.retry.backoff.multiplier.is_finite()
                        && self.retry.backoff.multiplier >= 1.0),
                "retry.backoff.multiplier must be a finite number >= 1.0",
            ),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(WeftError::InvalidConfig((*message).to_string())),
            None => Ok(()),
        }
    }

    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            duration: Duration::from_millis(self.lease.duration_ms),
            claim_batch: self.lease.claim_batch,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.backoff.to_backoff())
    }

    pub fn graph_limits(&self) -> GraphLimits {
        GraphLimits {
            max_tasks: self.limits.max_tasks,
            max_payload_bytes: self.limits.max_payload_bytes,
        }
    }

    pub fn store_retry(&self) -> StoreRetryConfig {
        StoreRetryConfig {
            attempts: self.store.op_attempts,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.store.op_retry_base_ms),
                multiplier: 2.0,
                max: Duration::from_millis(self.store.op_retry_max_ms),
            },
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(self.monitor.interval_ms),
            batch: self.monitor.batch,
            retry: self.retry_policy(),
        }
    }

    pub fn worker_config(&self, worker_id: impl Into<WorkerId>) -> WorkerConfig {
        WorkerConfig {
            worker_id: worker_id.into(),
            max_jobs: self.worker.max_jobs,
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            lease: self.lease_config(),
            retry: self.retry_policy(),
            sweep_interval: self
                .worker
                .sweep
                .then(|| Duration::from_millis(self.monitor.interval_ms)),
            sweep_batch: self.monitor.batch,
            presence_ttl: Duration::from_millis(self.worker.presence_ttl_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WeftConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lease_config(), LeaseConfig::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.graph_limits(), GraphLimits::default());
        assert_eq!(config.store_retry(), StoreRetryConfig::default());
    }

    #[test]
    fn worker_config_follows_sections() {
        let mut config = WeftConfig::default();
        config.worker.max_jobs = 2;
        config.worker.sweep = false;
        let worker = config.worker_config("w1");
        assert_eq!(worker.worker_id, WorkerId::new("w1"));
        assert_eq!(worker.max_jobs, 2);
        assert_eq!(worker.sweep_interval, None);
        assert_eq!(worker.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn backoff_kinds_convert() {
        let mut section = BackoffSection {
            kind: BackoffKind::Fixed,
            base_ms: 250,
            ..BackoffSection::default()
        };
        assert_eq!(
            section.to_backoff(),
            Backoff::Fixed {
                delay: Duration::from_millis(250)
            }
        );
        section.kind = BackoffKind::None;
        assert_eq!(section.to_backoff(), Backoff::None);
    }

    #[test]
    fn validate_rejects_zero_lease() {
        let mut config = WeftConfig::default();
        config.lease.duration_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lease.duration_ms"));
    }

    #[test]
    fn validate_rejects_shrinking_exponential() {
        let mut config = WeftConfig::default();
        config.retry.backoff.multiplier = 0.5;
        assert!(matches!(config.validate(), Err(WeftError::InvalidConfig(_))));
    }
}
