//! Impls - store adapters.
//!
//! - **MemoryStore**: in-process store (single node, tests, demos)
//! - **RetryingStore**: bounded retry of transient failures around any store
//!
//! Networked backends implement `ports::Store` in their own crates.

pub mod memory_store;
pub mod retrying_store;

pub use self::memory_store::MemoryStore;
pub use self::retrying_store::{RetryingStore, StoreRetryConfig};
