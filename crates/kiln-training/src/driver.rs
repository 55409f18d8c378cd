use crate::dataset::list_record_files;
use crate::error::{TrainingError, TrainingResult};
use crate::history::HistoryJournal;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::selector::Selection;
use crate::trainer::{BatchStreamSpec, EvalOutcome, TrainOutcome, TrainRequest, TrainingBackend};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

struct HookState<'a> {
    journal: &'a mut HistoryJournal,
    recorded: Vec<u64>,
    error: Option<TrainingError>,
}

/// Forwards progress events and records each checkpoint in the journal as
/// soon as the backend reports it.
struct CheckpointHook<'a> {
    inner: &'a dyn ProgressSink,
    batch_size: u64,
    state: Mutex<HookState<'a>>,
}

impl<'a> CheckpointHook<'a> {
    fn new(inner: &'a dyn ProgressSink, journal: &'a mut HistoryJournal, batch_size: u64) -> Self {
        Self { inner, batch_size, state: Mutex::new(HookState { journal, recorded: Vec::new(), error: None }) }
    }

    fn record(&self, global_step: u64) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        if state.error.is_some() || state.recorded.contains(&global_step) {
            return;
        }
        match state.journal.record_samples(global_step * self.batch_size) {
            Ok(()) => state.recorded.push(global_step),
            Err(e) => {
                warn!(global_step, error = %e, "Failed to record checkpoint in training history");
                state.error = Some(e);
            }
        }
    }

    /// Record checkpoints the backend returned without reporting, then
    /// surface the first journal failure.
    fn finish(self, checkpoints_saved: &[u64]) -> TrainingResult<()> {
        for &step in checkpoints_saved {
            self.record(step);
        }
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        state.error.map_or(Ok(()), Err)
    }
}

impl ProgressSink for CheckpointHook<'_> {
    fn on_event(&self, event: ProgressEvent) {
        if let ProgressEvent::CheckpointSaved { global_step } = &event {
            self.record(*global_step);
        }
        self.inner.on_event(event);
    }
}

/// Hands selected files to the backend and reacts to its checkpoint events.
#[derive(Debug, Clone)]
pub struct TrainingStepDriver {
    batch_size: u64,
    batches_per_epoch: u64,
    lr_scale: Option<f64>,
    record_extension: String,
}

impl TrainingStepDriver {
    #[must_use]
    pub fn new(batch_size: u64, batches_per_epoch: u64, lr_scale: Option<f64>, record_extension: String) -> Self {
        Self { batch_size, batches_per_epoch, lr_scale, record_extension }
    }

    /// Run one training pass over `selection`.
    ///
    /// Every checkpoint the backend persists is recorded in the journal as a
    /// cumulative sample count, and the journal persisted, when its
    /// `CheckpointSaved` event arrives. Checkpoints listed in the outcome but
    /// never reported are recorded once the pass returns. An empty selection
    /// skips the backend entirely.
    pub async fn train_sub_epoch<B: TrainingBackend + ?Sized>(
        &self,
        backend: &mut B,
        selection: &Selection,
        total_files: usize,
        journal: &mut HistoryJournal,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<Option<TrainOutcome>> {
        if selection.is_empty() {
            warn!(total_files, "No usable training files selected, skipping training step");
            return Ok(None);
        }

        info!(
            "Constructing train input pipe, {}/{} files used ({} batches)",
            selection.files.len(),
            total_files,
            selection.batches
        );
        let request = TrainRequest {
            stream: BatchStreamSpec::training(selection.files.clone(), self.batch_size),
            batches_per_epoch: self.batches_per_epoch,
            lr_scale: self.lr_scale,
        };

        let hook = CheckpointHook::new(progress, journal, self.batch_size);
        let outcome = backend.train(&request, &hook).await?;
        hook.finish(&outcome.checkpoints_saved)?;
        Ok(Some(outcome))
    }

    /// Evaluate on every record file in `val_dir`, or skip if there are none.
    pub async fn validate<B: TrainingBackend + ?Sized>(
        &self,
        backend: &mut B,
        val_dir: Option<&Path>,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<Option<EvalOutcome>> {
        let files = match val_dir {
            Some(dir) => list_record_files(dir, &self.record_extension)?,
            None => Vec::new(),
        };
        if files.is_empty() {
            info!("No validation files, skipping validation step");
            return Ok(None);
        }

        info!("Constructing validation input pipe, {} files", files.len());
        let stream = BatchStreamSpec::validation(files, self.batch_size);
        Ok(Some(backend.evaluate(&stream, progress).await?))
    }
}
