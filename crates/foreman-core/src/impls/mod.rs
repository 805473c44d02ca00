//! Impls - in-process implementations of the ports.
//!
//! - `InMemoryTaskStore`: mutex-guarded store, optionally backed by a JSON snapshot
//! - `NoopCheck` / `NoopTestRunner`: gate tooling that always passes

pub mod inmem_store;
pub mod noop_checks;
pub mod snapshot;

pub use self::inmem_store::InMemoryTaskStore;
pub use self::noop_checks::{NoopCheck, NoopTestRunner};
pub use self::snapshot::{SNAPSHOT_VERSION, Snapshot};
