use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = "trainhistory.json";
pub const MODEL_CONFIG_FILE: &str = "model.config.json";
pub const LOG_FILE: &str = "train.log";

/// Filesystem layout of a training run directory.
///
/// ```text
/// <run_dir>/
///   trainhistory.json
///   model.config.json
///   train.log
///   longterm_checkpoints/
///   initial_weights/            (optional warm start)
///     trainhistory.json
/// ```
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    #[must_use]
    pub fn history_tmp_path(&self) -> PathBuf {
        self.root.join(format!("{HISTORY_FILE}.tmp"))
    }

    #[must_use]
    pub fn model_config_path(&self) -> PathBuf {
        self.root.join(MODEL_CONFIG_FILE)
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    #[must_use]
    pub fn longterm_checkpoints_dir(&self) -> PathBuf {
        self.root.join("longterm_checkpoints")
    }

    #[must_use]
    pub fn initial_weights_dir(&self) -> PathBuf {
        self.root.join("initial_weights")
    }

    #[must_use]
    pub fn inherited_history_path(&self) -> PathBuf {
        self.initial_weights_dir().join(HISTORY_FILE)
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        for dir in [self.root.clone(), self.longterm_checkpoints_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| TrainingError::io_at(&dir, e))?;
        }
        Ok(())
    }
}
