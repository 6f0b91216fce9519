//! Ports - capability interfaces the engine depends on.
//!
//! The shared store is the only synchronization point between workers and
//! scheduler instances; the clock and id generator are injected so tests can
//! pin time.

pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{Store, StoreError, StoreOp};
