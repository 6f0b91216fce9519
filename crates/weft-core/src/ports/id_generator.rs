//! IdGenerator port - id generation.
//!
//! Ids must be unique without coordination between scheduler instances, so
//! they are ULIDs: a clock-derived timestamp plus random bits.
//!
//! Task ids are not minted here: clients choose them when building a
//! `GraphSpec`, and submission only checks them for uniqueness.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{GraphId, LeaseId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn graph_id(&self) -> GraphId;

    fn lease_id(&self) -> LeaseId;
}

/// ULID-based generator. The timestamp part comes from the injected clock,
/// which keeps ids ordered consistently with the engine's notion of time.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn graph_id(&self) -> GraphId {
        GraphId::from(self.next())
    }

    fn lease_id(&self) -> LeaseId {
        LeaseId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ManualClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let ids = UlidGenerator::new(Arc::new(SystemClock));
        let a = ids.lease_id();
        let b = ids.lease_id();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_comes_from_clock() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ids = UlidGenerator::new(Arc::new(ManualClock::new(fixed)));

        let id1 = ids.lease_id();
        let id2 = ids.graph_id();
        assert_ne!(id1.as_ulid(), id2.as_ulid());
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
    }

    #[test]
    fn prefixes_differ_per_kind() {
        let ids = UlidGenerator::new(Arc::new(SystemClock));
        assert!(ids.graph_id().to_string().starts_with("graph-"));
        assert!(ids.lease_id().to_string().starts_with("lease-"));
    }
}
