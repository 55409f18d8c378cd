use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed dataset manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("malformed sidecar descriptor {path}: {reason}")]
    Sidecar { path: PathBuf, reason: String },

    #[error("training history error: {0}")]
    Journal(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("weight averaging error: {0}")]
    Averaging(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub(crate) fn io_at(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(err.kind(), format!("{}: {err}", path.display())))
    }
}
