//! A deterministic in-process backend.
//!
//! `SimulatedBackend` keeps a handful of named parameter vectors on the CPU.
//! Every batch of a record file pulls the parameters toward a target derived
//! from the file's content hash, so training is reproducible and depends on
//! the data it is given. It persists multi-part checkpoints in the run
//! directory and exports snapshots as JSON, which is enough to drive the
//! orchestrator end to end.

use crate::atomic::{write_json_atomic, write_json_synced};
use crate::dataset::load_record_info;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::RunLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::trainer::{BatchStreamSpec, EvalOutcome, ParameterSet, TrainOutcome, TrainRequest, TrainingBackend};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PARAMS_FILE: &str = "params.json";
const CHECKPOINT_STATE_FILE: &str = "checkpoint";
const CHECKPOINT_STEM: &str = "model.ckpt";

/// Shape and optimizer settings of the simulated model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedModel {
    /// Parameter name to flattened length.
    pub parameters: BTreeMap<String, usize>,
    pub learning_rate: f64,
    /// Emit training metrics every this many steps.
    pub log_every_steps: u64,
    /// Checkpoints kept in the run directory.
    pub keep_checkpoints: usize,
}

impl Default for SimulatedModel {
    fn default() -> Self {
        let parameters = [
            ("trunk/conv1/w", 64),
            ("trunk/conv1/b", 8),
            ("policy/fc/w", 32),
            ("value/fc/w", 16),
        ]
        .into_iter()
        .map(|(name, len)| (name.to_string(), len))
        .collect();
        Self { parameters, learning_rate: 0.01, log_every_steps: 100, keep_checkpoints: 10 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredParameters {
    global_step: u64,
    parameters: ParameterSet,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointState {
    latest: String,
}

#[derive(Debug, Serialize)]
struct CheckpointIndex<'a> {
    global_step: u64,
    shapes: &'a BTreeMap<String, usize>,
}

pub struct SimulatedBackend {
    run_dir: PathBuf,
    model: SimulatedModel,
    params: ParameterSet,
    global_step: u64,
    checkpoints: VecDeque<PathBuf>,
}

impl std::fmt::Debug for SimulatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBackend")
            .field("run_dir", &self.run_dir)
            .field("global_step", &self.global_step)
            .finish_non_exhaustive()
    }
}

fn read_parameters(path: &Path) -> TrainingResult<StoredParameters> {
    let bytes = std::fs::read(path).map_err(|e| TrainingError::io_at(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TrainingError::Backend(format!("failed to parse {}: {e}", path.display())))
}

fn initial_value(name: &str, index: usize) -> f32 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    f32::from(digest[0]) / 255.0 * 0.2 - 0.1
}

/// Per-batch regression target in `[-1, 1]`.
fn batch_target(file_digest: &[u8], batch: i64) -> f32 {
    let mut hasher = Sha256::new();
    hasher.update(file_digest);
    hasher.update(batch.to_le_bytes());
    let digest = hasher.finalize();
    let raw = u16::from_le_bytes([digest[0], digest[1]]);
    f32::from(raw) / f32::from(u16::MAX) * 2.0 - 1.0
}

fn file_digest(path: &Path) -> TrainingResult<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| TrainingError::io_at(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(path.file_name().map(|n| n.as_encoded_bytes()).unwrap_or_default());
    hasher.update(&bytes);
    Ok(hasher.finalize().to_vec())
}

impl SimulatedBackend {
    /// Resume from the run directory's latest checkpoint, else warm-start from
    /// `<run_dir>/initial_weights/params.json`, else initialize fresh.
    pub fn new(run_dir: PathBuf, model: SimulatedModel) -> TrainingResult<Self> {
        let mut backend = Self { run_dir, model, params: ParameterSet::new(), global_step: 0, checkpoints: VecDeque::new() };

        let state_path = backend.run_dir.join(CHECKPOINT_STATE_FILE);
        let warm_start = RunLayout::new(backend.run_dir.clone()).initial_weights_dir().join(PARAMS_FILE);
        if state_path.is_file() {
            let bytes = std::fs::read(&state_path).map_err(|e| TrainingError::io_at(&state_path, e))?;
            let state: CheckpointState = serde_json::from_slice(&bytes)?;
            let prefix = backend.run_dir.join(&state.latest);
            let stored = read_parameters(&data_path(&prefix))?;
            info!(checkpoint = %prefix.display(), global_step = stored.global_step, "Restoring from checkpoint");
            backend.global_step = stored.global_step;
            backend.params = stored.parameters;
            backend.checkpoints.push_back(prefix);
        } else if warm_start.is_file() {
            info!(path = %warm_start.display(), "Initial weights found");
            backend.params = read_parameters(&warm_start)?.parameters;
        }

        for (name, &len) in &backend.model.parameters {
            match backend.params.get(name) {
                Some(existing) if existing.len() == len => {}
                Some(existing) => {
                    return Err(TrainingError::Backend(format!(
                        "stored parameter {name} has length {}, model expects {len}",
                        existing.len()
                    )));
                }
                None => {
                    let values = (0..len).map(|i| initial_value(name, i)).collect();
                    backend.params.insert(name.clone(), values);
                }
            }
        }
        backend.params.retain(|name, _| backend.model.parameters.contains_key(name));

        Ok(backend)
    }

    fn learning_rate(&self, lr_scale: Option<f64>) -> f32 {
        (self.model.learning_rate * lr_scale.unwrap_or(1.0)) as f32
    }

    fn squared_error(&self, target: f32) -> f64 {
        let (sum, count) = self
            .params
            .values()
            .flatten()
            .fold((0.0f64, 0usize), |(sum, count), &p| (sum + f64::from((target - p).powi(2)), count + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    fn save_checkpoint(&mut self) -> TrainingResult<PathBuf> {
        let prefix = self.run_dir.join(format!("{CHECKPOINT_STEM}-{}", self.global_step));
        write_json_synced(
            &index_path(&prefix),
            &CheckpointIndex { global_step: self.global_step, shapes: &self.model.parameters },
        )?;
        write_json_synced(
            &data_path(&prefix),
            &StoredParameters { global_step: self.global_step, parameters: self.params.clone() },
        )?;

        let latest = prefix
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| TrainingError::Backend(format!("invalid checkpoint path {}", prefix.display())))?;
        let state_path = self.run_dir.join(CHECKPOINT_STATE_FILE);
        write_json_atomic(&state_path, &self.run_dir.join("checkpoint.tmp"), &CheckpointState { latest })?;

        if self.checkpoints.back() != Some(&prefix) {
            self.checkpoints.push_back(prefix.clone());
        }
        while self.checkpoints.len() > self.model.keep_checkpoints.max(1) {
            if let Some(old) = self.checkpoints.pop_front() {
                let _ = std::fs::remove_file(index_path(&old));
                let _ = std::fs::remove_file(data_path(&old));
            }
        }
        Ok(prefix)
    }

    async fn write_parameters(dest: PathBuf, stored: StoredParameters) -> TrainingResult<()> {
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dest).map_err(|e| TrainingError::io_at(&dest, e))?;
            write_json_synced(&dest.join(PARAMS_FILE), &stored)
        })
        .await
        .map_err(|e| TrainingError::Backend(format!("snapshot writer panicked: {e}")))?
    }
}

fn index_path(prefix: &Path) -> PathBuf {
    PathBuf::from(format!("{}.index", prefix.display()))
}

fn data_path(prefix: &Path) -> PathBuf {
    PathBuf::from(format!("{}.data", prefix.display()))
}

#[async_trait]
impl TrainingBackend for SimulatedBackend {
    fn id(&self) -> &'static str {
        "simulated"
    }

    fn model_config(&self) -> serde_json::Value {
        serde_json::json!({
            "backend": self.id(),
            "parameters": self.model.parameters,
            "learning_rate": self.model.learning_rate,
        })
    }

    fn global_step(&self) -> u64 {
        self.global_step
    }

    async fn train(&mut self, request: &TrainRequest, progress: &dyn ProgressSink) -> TrainingResult<TrainOutcome> {
        let lr = self.learning_rate(request.lr_scale);
        let mut files = request.stream.files.clone();
        if request.stream.file_shuffle_buffer > 0 {
            files.shuffle(&mut StdRng::seed_from_u64(self.global_step));
        }

        let mut window_loss = 0.0;
        let mut window_batches = 0u64;
        for file in &files {
            let batches = load_record_info(file)?.declared_batches;
            let digest = file_digest(file)?;
            debug!(path = %file.display(), batches, "Training on record file");

            for batch in 0..batches.max(0) {
                let target = batch_target(&digest, batch);
                window_loss += self.squared_error(target);
                window_batches += 1;
                for value in self.params.values_mut().flatten() {
                    *value += lr * (target - *value);
                }
                self.global_step += 1;

                if self.global_step % self.model.log_every_steps.max(1) == 0 {
                    let mut metrics = BTreeMap::new();
                    metrics.insert("loss".to_string(), window_loss / window_batches as f64);
                    metrics.insert("nsamp".to_string(), (self.global_step * request.stream.batch_size) as f64);
                    metrics.insert("lr".to_string(), f64::from(lr));
                    progress.on_event(ProgressEvent::TrainMetrics { global_step: self.global_step, metrics });
                    window_loss = 0.0;
                    window_batches = 0;
                }
            }
        }

        self.save_checkpoint()?;
        progress.on_event(ProgressEvent::CheckpointSaved { global_step: self.global_step });
        Ok(TrainOutcome { global_step: self.global_step, checkpoints_saved: vec![self.global_step] })
    }

    async fn evaluate(&mut self, stream: &BatchStreamSpec, progress: &dyn ProgressSink) -> TrainingResult<EvalOutcome> {
        let mut total = 0.0;
        let mut batches = 0u64;
        for file in &stream.files {
            let count = load_record_info(file)?.declared_batches;
            let digest = file_digest(file)?;
            for batch in 0..count.max(0) {
                total += self.squared_error(batch_target(&digest, batch));
                batches += 1;
            }
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("loss".to_string(), if batches == 0 { 0.0 } else { total / batches as f64 });
        metrics.insert("batches".to_string(), batches as f64);
        progress.on_event(ProgressEvent::EvalMetrics { global_step: self.global_step, metrics: metrics.clone() });
        Ok(EvalOutcome { global_step: self.global_step, metrics })
    }

    fn parameter_names(&self) -> Vec<String> {
        self.params.keys().cloned().collect()
    }

    fn parameter(&self, name: &str) -> TrainingResult<Vec<f32>> {
        self.params
            .get(name)
            .cloned()
            .ok_or_else(|| TrainingError::Backend(format!("unknown parameter {name}")))
    }

    async fn export_snapshot(&self, dest: &Path) -> TrainingResult<()> {
        let stored = StoredParameters { global_step: self.global_step, parameters: self.params.clone() };
        Self::write_parameters(dest.to_path_buf(), stored).await
    }

    async fn save_parameters(&self, params: &ParameterSet, dest: &Path) -> TrainingResult<()> {
        let stored = StoredParameters { global_step: self.global_step, parameters: params.clone() };
        Self::write_parameters(dest.to_path_buf(), stored).await
    }

    fn latest_checkpoint(&self) -> Option<PathBuf> {
        self.checkpoints.back().cloned()
    }
}
