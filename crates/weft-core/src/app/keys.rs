//! Store key layout.
//!
//! - `{ns}:task:{task_id}`   task record (JSON)
//! - `{ns}:graph:{graph_id}` graph record (JSON)
//! - `{ns}:ready`            sorted set, score = eligibility time (ms)
//! - `{ns}:leases`           sorted set, score = lease expiry (ms)
//! - `{ns}:retries`          sorted set, score = retry due time (ms)
//! - `{ns}:worker:{id}`      worker presence (TTL key)

use crate::domain::{GraphId, TaskId, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    ns: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            ns: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn task(&self, id: TaskId) -> String {
        format!("{}:task:{}", self.ns, id)
    }

    pub fn graph(&self, id: GraphId) -> String {
        format!("{}:graph:{}", self.ns, id)
    }

    pub fn worker(&self, id: &WorkerId) -> String {
        format!("{}:worker:{}", self.ns, id)
    }

    pub fn ready(&self) -> String {
        format!("{}:ready", self.ns)
    }

    pub fn leases(&self) -> String {
        format!("{}:leases", self.ns)
    }

    pub fn retries(&self) -> String {
        format!("{}:retries", self.ns)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("weft")
    }
}
