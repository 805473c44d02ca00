use thiserror::Error;

use crate::app::BuildError;
use crate::config::ConfigError;
use crate::domain::StoreError;
use crate::manifest::ManifestError;

/// Top-level error of the orchestrator. Anything that reaches this type ends
/// the process; per-task failures never do.
#[derive(Debug, Error)]
pub enum ForemanError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("worker crashed: {0}")]
    WorkerCrashed(String),
}

pub type Result<T, E = ForemanError> = std::result::Result<T, E>;
