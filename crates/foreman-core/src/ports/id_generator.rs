//! IdGenerator port - ID 生成の抽象化
//!
//! Task ids come from the manifest; only runtime identities (workers) are
//! generated here.

use ulid::Ulid;

use crate::domain::ids::WorkerId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_worker_id(&self) -> WorkerId;
}

/// ULID-based generator. The timestamp part comes from the injected clock,
/// the random part from `rand`, so a `FixedClock` still yields distinct ids.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_worker_id(&self) -> WorkerId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        WorkerId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
