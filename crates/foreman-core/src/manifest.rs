//! Work manifest: the fixed list of `(id, category)` pairs seeded at startup.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Category, TaskId};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML manifest: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported manifest format (expected .toml or .json): {0}")]
    UnsupportedFormat(PathBuf),

    #[error("manifest contains no tasks")]
    Empty,

    #[error("manifest entry {index} has a blank id or category")]
    BlankEntry { index: usize },

    #[error("duplicate task id in manifest: {0}")]
    DuplicateId(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: TaskId,
    pub category: Category,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub tasks: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(tasks: impl IntoIterator<Item = (TaskId, Category)>) -> Self {
        Self {
            tasks: tasks
                .into_iter()
                .map(|(id, category)| ManifestEntry { id, category })
                .collect(),
        }
    }

    /// Loads and validates a manifest; the format follows the file extension.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str::<Manifest>(&text)?,
            Some("json") => serde_json::from_str::<Manifest>(&text)?,
            _ => return Err(ManifestError::UnsupportedFormat(path.to_path_buf())),
        };
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.tasks.is_empty() {
            return Err(ManifestError::Empty);
        }
        let mut seen = HashSet::new();
        for (index, entry) in self.tasks.iter().enumerate() {
            if entry.id.as_str().trim().is_empty() || entry.category.as_str().trim().is_empty() {
                return Err(ManifestError::BlankEntry { index });
            }
            if !seen.insert(&entry.id) {
                return Err(ManifestError::DuplicateId(entry.id.clone()));
            }
        }
        Ok(())
    }

    pub fn categories(&self) -> BTreeSet<Category> {
        self.tasks.iter().map(|entry| entry.category.clone()).collect()
    }

    pub fn ids(&self) -> HashSet<TaskId> {
        self.tasks.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
