//! Status - metrics aggregate の公開
//!
//! The orchestrator recomputes the aggregate from the task records every cycle
//! and publishes it on a watch channel. `MetricsHandle` is the read-only side
//! handed to dashboards and the CLI.

use tokio::sync::watch;

use crate::domain::{MetricsAggregate, StoreError};
use crate::ports::TaskStore;

pub fn metrics_channel() -> (MetricsPublisher, MetricsHandle) {
    let (tx, rx) = watch::channel(MetricsAggregate::default());
    (MetricsPublisher { tx }, MetricsHandle { rx })
}

/// Recomputes the aggregate from the current records.
pub async fn compute(store: &dyn TaskStore) -> Result<MetricsAggregate, StoreError> {
    let tasks = store.list_tasks().await?;
    Ok(MetricsAggregate::from_tasks(&tasks))
}

pub struct MetricsPublisher {
    tx: watch::Sender<MetricsAggregate>,
}

impl MetricsPublisher {
    /// Works with or without subscribers.
    pub fn publish(&self, aggregate: MetricsAggregate) {
        self.tx.send_replace(aggregate);
    }

    pub fn subscribe(&self) -> MetricsHandle {
        MetricsHandle {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Clone)]
pub struct MetricsHandle {
    rx: watch::Receiver<MetricsAggregate>,
}

impl MetricsHandle {
    /// Latest published aggregate (all zeros before the first cycle).
    pub fn get_aggregate(&self) -> MetricsAggregate {
        self.rx.borrow().clone()
    }

    /// Waits for the next publication. `false` once the publisher is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
