//! Caller-supplied policies: retry backoff, lease timing, graph limits.
//!
//! None of these are ambient defaults inside the engine; every operation that
//! needs one takes it as an argument.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay curve applied before a retried task becomes claimable again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    None,

    /// Same delay for every retry.
    Fixed { delay: Duration },

    /// `base + step * (retry - 1)`.
    Linear { base: Duration, step: Duration },

    /// `base * multiplier^(retry - 1)`, capped at `max`.
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (1-indexed; 0 is treated as 1).
    ///
    /// Example with Exponential { base: 2s, multiplier: 2.0, max: 60s }:
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 3: 8s
    pub fn delay(&self, retry: u32) -> Duration {
        let n = retry.saturating_sub(1);
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay } => *delay,
            Backoff::Linear { base, step } => base.saturating_add(step.saturating_mul(n)),
            Backoff::Exponential {
                base,
                multiplier,
                max,
            } => {
                let secs = base.as_secs_f64() * multiplier.powi(n.min(i32::MAX as u32) as i32);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

/// Retry policy for failed or abandoned tasks.
///
/// The retry budget itself (`max_retries`) is per task and lives on the task
/// record; this only decides timing.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    /// Retry without delay. Mostly useful in tests.
    pub fn immediate() -> Self {
        Self::new(Backoff::None)
    }

    pub fn next_delay(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Backoff::Exponential {
            base: Duration::from_secs(2),
            multiplier: 2.0,
            max: Duration::from_secs(300),
        })
    }
}

/// Lease settings for a claim.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseConfig {
    /// Time before a claim without heartbeat is considered abandoned.
    pub duration: Duration,

    /// How many ready-queue heads one claim round inspects.
    pub claim_batch: usize,
}

impl LeaseConfig {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            claim_batch: 16,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Bounds checked at submission.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphLimits {
    pub max_tasks: usize,
    pub max_payload_bytes: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_tasks: 10_000,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn exponential_backoff_increases_until_cap() {
        let policy = RetryPolicy::new(Backoff::Exponential {
            base: secs(2),
            multiplier: 2.0,
            max: secs(10),
        });

        assert_eq!(policy.next_delay(1), secs(2));
        assert_eq!(policy.next_delay(2), secs(4));
        assert_eq!(policy.next_delay(3), secs(8));
        assert_eq!(policy.next_delay(4), secs(10));
        assert_eq!(policy.next_delay(200), secs(10));
    }

    #[rstest]
    #[case(0, secs(5))]
    #[case(1, secs(5))]
    #[case(2, secs(7))]
    #[case(3, secs(9))]
    fn linear_backoff(#[case] retry: u32, #[case] expected: Duration) {
        let backoff = Backoff::Linear {
            base: secs(5),
            step: secs(2),
        };
        assert_eq!(backoff.delay(retry), expected);
    }

    #[test]
    fn fixed_and_none() {
        assert_eq!(Backoff::Fixed { delay: secs(3) }.delay(9), secs(3));
        assert_eq!(Backoff::None.delay(9), Duration::ZERO);
        assert_eq!(RetryPolicy::immediate().next_delay(1), Duration::ZERO);
    }
}
