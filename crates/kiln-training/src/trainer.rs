use crate::error::TrainingResult;
use crate::progress::ProgressSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Named parameter tensors, flattened.
pub type ParameterSet = BTreeMap<String, Vec<f32>>;

/// How the backend should build a batch stream out of record files.
///
/// Decoding, shuffling and prefetching are entirely the backend's business;
/// this only says which files and with what buffer sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStreamSpec {
    pub files: Vec<PathBuf>,
    pub batch_size: u64,
    /// Shuffle buffer over file order, 0 to keep the given order.
    pub file_shuffle_buffer: usize,
    /// Shuffle buffer over decoded batches, 0 to disable.
    pub batch_shuffle_buffer: usize,
    pub prefetch: usize,
}

impl BatchStreamSpec {
    pub const FILE_SHUFFLE_BUFFER: usize = 65_536;
    pub const BATCH_SHUFFLE_BUFFER: usize = 1_000;
    pub const PREFETCH: usize = 2;

    /// Shuffled stream used for training.
    #[must_use]
    pub fn training(files: Vec<PathBuf>, batch_size: u64) -> Self {
        Self {
            files,
            batch_size,
            file_shuffle_buffer: Self::FILE_SHUFFLE_BUFFER,
            batch_shuffle_buffer: Self::BATCH_SHUFFLE_BUFFER,
            prefetch: Self::PREFETCH,
        }
    }

    /// Unshuffled stream used for validation.
    #[must_use]
    pub fn validation(files: Vec<PathBuf>, batch_size: u64) -> Self {
        Self { files, batch_size, file_shuffle_buffer: 0, batch_shuffle_buffer: 0, prefetch: Self::PREFETCH }
    }
}

/// One training pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    pub stream: BatchStreamSpec,
    /// Batches that make up one epoch, for learning-rate schedules.
    pub batches_per_epoch: u64,
    pub lr_scale: Option<f64>,
}

/// Result of a training pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub global_step: u64,
    /// Global step of every checkpoint persisted during the pass, in order.
    pub checkpoints_saved: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub global_step: u64,
    pub metrics: BTreeMap<String, f64>,
}

/// The model side of training: everything the orchestrator does not own.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    fn id(&self) -> &'static str;

    /// Static description of the model, recorded in history and exports.
    fn model_config(&self) -> serde_json::Value;

    fn global_step(&self) -> u64;

    /// Run one training pass over the stream. May persist checkpoints.
    async fn train(&mut self, request: &TrainRequest, progress: &dyn ProgressSink) -> TrainingResult<TrainOutcome>;

    /// Evaluate the current parameters without changing them.
    async fn evaluate(&mut self, stream: &BatchStreamSpec, progress: &dyn ProgressSink) -> TrainingResult<EvalOutcome>;

    /// Names of every parameter tracked for weight averaging.
    fn parameter_names(&self) -> Vec<String>;

    fn parameter(&self, name: &str) -> TrainingResult<Vec<f32>>;

    /// Write the current trained snapshot into `dest`, which must not exist yet.
    async fn export_snapshot(&self, dest: &Path) -> TrainingResult<()>;

    /// Write an arbitrary parameter set into `dest` as a snapshot.
    ///
    /// Used for the averaged snapshot; implementations must not disturb live
    /// training state or resources while doing so.
    async fn save_parameters(&self, params: &ParameterSet, dest: &Path) -> TrainingResult<()>;

    /// Path prefix of the latest checkpoint; its parts match `"{prefix}*"`.
    fn latest_checkpoint(&self) -> Option<PathBuf>;
}
