//! JSON snapshot of the whole store.
//!
//! Written after every mutation: serialize to `<path>.tmp`, then rename over
//! `<path>`. A reader sees either the previous snapshot or the new one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{Category, MetricsAggregate, StoreError, TaskId, TaskRecord};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,

    /// Insertion order.
    pub tasks: Vec<TaskRecord>,

    /// Queue contents per category, head first.
    #[serde(default)]
    pub queues: BTreeMap<Category, Vec<TaskId>>,
}

impl Snapshot {
    pub fn new(tasks: Vec<TaskRecord>, queues: BTreeMap<Category, Vec<TaskId>>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            tasks,
            queues,
        }
    }

    /// Reads a snapshot. `Ok(None)` when the file does not exist yet.
    pub async fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(path, "read", e)),
        };
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| unavailable(path, "parse", e))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Unavailable(format!(
                "{}: unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                path.display(),
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub async fn write_atomic(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| unavailable(path, "serialize", e))?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| unavailable(&tmp, "write", e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| unavailable(path, "rename", e))?;
        Ok(())
    }

    pub fn aggregate(&self) -> MetricsAggregate {
        MetricsAggregate::from_tasks(&self.tasks)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn unavailable(path: &Path, op: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("snapshot {op} failed for {}: {err}", path.display()))
}
