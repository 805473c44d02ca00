//! Ports: the traits at the seams of the orchestrator.
//!
//! The core only talks to storage, time, id generation, the producer and the
//! gate tooling through these traits. `impls` holds the in-process
//! implementations; the binary crate supplies subprocess-backed adapters.

pub mod clock;
pub mod gate_check;
pub mod id_generator;
pub mod producer;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::gate_check::{CheckOutcome, GateCheck, TestOutcome, TestRunner};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::producer::Producer;
pub use self::task_store::TaskStore;
