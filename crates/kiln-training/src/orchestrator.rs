//! The epoch loop.
//!
//! Each epoch walks the phases of [`LoopPhase`] once, in order:
//!
//! 1. `ReloadData` picks up a swapped dataset, if any.
//! 2. `RunSubEpochs` selects files, trains and averages weights `sub_epochs` times.
//! 3. `ExportIfDue` publishes a snapshot for the current identity.
//! 4. `Validate` evaluates on the dataset's validation files.
//! 5. `MaybeBackup` archives the latest checkpoint on its own cadence.
//!
//! There is no terminal phase; [`Orchestrator::run`] only returns on error.

use crate::atomic::write_json_synced;
use crate::backup::{BackupOutcome, BackupScheduler};
use crate::config::TrainConfig;
use crate::driver::TrainingStepDriver;
use crate::error::{TrainingError, TrainingResult};
use crate::export::{ExportOutcome, ExportRequest, SnapshotExporter, SnapshotIdentity};
use crate::history::{HistoryJournal, HistorySource};
use crate::layout::RunLayout;
use crate::progress::{ProgressSink, TracingProgressSink};
use crate::selector::{select_files, FileCursor};
use crate::swa::SwaAccumulator;
use crate::trainer::{EvalOutcome, TrainOutcome, TrainingBackend};
use crate::watcher::{ManifestWatcher, ReloadOutcome};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopPhase {
    ReloadData,
    RunSubEpochs,
    ExportIfDue,
    Validate,
    MaybeBackup,
}

impl LoopPhase {
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::ReloadData => Self::RunSubEpochs,
            Self::RunSubEpochs => Self::ExportIfDue,
            Self::ExportIfDue => Self::Validate,
            Self::Validate => Self::MaybeBackup,
            Self::MaybeBackup => Self::ReloadData,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubEpochReport {
    pub index: u32,
    /// Whether a new dataset was loaded right before this sub-epoch.
    pub reloaded: bool,
    /// Record files handed to the backend, in training order.
    pub files: Vec<PathBuf>,
    pub batches_selected: i64,
    /// `None` when nothing usable was selected and training was skipped.
    pub train: Option<TrainOutcome>,
}

/// What happened during one pass of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: u64,
    pub reloaded: bool,
    pub sub_epochs: Vec<SubEpochReport>,
    /// `None` when exporting is disabled.
    pub export: Option<ExportOutcome>,
    pub validation: Option<EvalOutcome>,
    pub backup: BackupOutcome,
}

pub struct Orchestrator<B: TrainingBackend> {
    config: TrainConfig,
    layout: RunLayout,
    backend: B,
    model_config: serde_json::Value,
    watcher: ManifestWatcher,
    cursor: FileCursor,
    journal: HistoryJournal,
    swa: Option<SwaAccumulator>,
    exporter: Option<SnapshotExporter>,
    backup: BackupScheduler,
    driver: TrainingStepDriver,
    rng: StdRng,
    epoch: u64,
    progress: Arc<dyn ProgressSink>,
}

impl<B: TrainingBackend> std::fmt::Debug for Orchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run_dir", &self.layout.root())
            .field("backend", &self.backend.id())
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl<B: TrainingBackend> Orchestrator<B> {
    /// Prepare the run directory and load the journal.
    pub fn new(config: TrainConfig, backend: B) -> TrainingResult<Self> {
        config.validate()?;

        let layout = RunLayout::new(config.run_dir.clone());
        layout.ensure_dirs()?;

        let exporter = if config.no_export {
            info!("Snapshot export disabled");
            None
        } else {
            std::fs::create_dir_all(&config.export_dir).map_err(|e| TrainingError::io_at(&config.export_dir, e))?;
            Some(SnapshotExporter::new(
                config.export_dir.clone(),
                config.export_prefix.clone(),
                config.export_settle(),
            ))
        };

        let model_config = backend.model_config();
        write_json_synced(&layout.model_config_path(), &model_config)?;

        let (journal, source) = HistoryJournal::load(&layout, &model_config)?;
        if source == HistorySource::Fresh {
            info!("Starting a fresh training history");
        }

        let swa = config.swa_scale.map(SwaAccumulator::new).transpose()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let watcher = ManifestWatcher::new(
            config.data_dir.clone(),
            config.record_extension.clone(),
            config.reload_backoff(),
        );
        let driver = TrainingStepDriver::new(
            config.batch_size,
            config.batches_per_epoch(),
            config.lr_scale,
            config.record_extension.clone(),
        );
        let backup = BackupScheduler::new(layout.longterm_checkpoints_dir(), config.backup_interval(), Utc::now());

        info!(
            backend = backend.id(),
            run_dir = %layout.root().display(),
            batches_per_epoch = config.batches_per_epoch(),
            sub_epochs = config.sub_epochs,
            swa = swa.is_some(),
            "Orchestrator ready"
        );

        Ok(Self {
            config,
            layout,
            backend,
            model_config,
            watcher,
            cursor: FileCursor::default(),
            journal,
            swa,
            exporter,
            backup,
            driver,
            rng,
            epoch: 0,
            progress: Arc::new(TracingProgressSink),
        })
    }

    /// Replace the sink that receives the backend's streaming metrics.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn journal(&self) -> &HistoryJournal {
        &self.journal
    }

    #[must_use]
    pub fn swa(&self) -> Option<&SwaAccumulator> {
        self.swa.as_ref()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Run epochs until something fails.
    pub async fn run(&mut self) -> TrainingResult<Infallible> {
        loop {
            self.run_epoch().await?;
        }
    }

    /// Run one full pass of the loop, starting at [`LoopPhase::ReloadData`].
    pub async fn run_epoch(&mut self) -> TrainingResult<EpochReport> {
        self.epoch += 1;
        info!(
            "=== Epoch {} | {} | step {} | {} samples ===",
            self.epoch,
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            self.backend.global_step(),
            self.journal.total_samples()
        );

        let mut report = EpochReport {
            epoch: self.epoch,
            reloaded: false,
            sub_epochs: Vec::new(),
            export: None,
            validation: None,
            backup: BackupOutcome::NotDue,
        };

        let mut phase = LoopPhase::ReloadData;
        loop {
            debug!(epoch = self.epoch, ?phase, "Entering phase");
            match phase {
                LoopPhase::ReloadData => report.reloaded = self.reload_data().await?,
                LoopPhase::RunSubEpochs => {
                    for index in 0..self.config.sub_epochs {
                        let sub_epoch = self.run_sub_epoch(index).await?;
                        report.sub_epochs.push(sub_epoch);
                    }
                }
                LoopPhase::ExportIfDue => report.export = self.export_if_due().await?,
                LoopPhase::Validate => {
                    let val_dir = self.watcher.val_dir();
                    report.validation =
                        self.driver.validate(&mut self.backend, val_dir.as_deref(), self.progress.as_ref()).await?;
                }
                LoopPhase::MaybeBackup => {
                    let checkpoint = self.backend.latest_checkpoint();
                    report.backup = self.backup.maybe_backup(Utc::now(), checkpoint.as_deref());
                }
            }

            phase = phase.next();
            if phase == LoopPhase::ReloadData {
                break;
            }
        }

        Ok(report)
    }

    async fn reload_data(&mut self) -> TrainingResult<bool> {
        match self.watcher.maybe_reload().await? {
            ReloadOutcome::Unchanged => Ok(false),
            ReloadOutcome::Reloaded(snapshot) => {
                self.journal.record_new_data(&snapshot.manifest);
                self.cursor.reset(snapshot.train_files);
                Ok(true)
            }
        }
    }

    async fn run_sub_epoch(&mut self, index: u32) -> TrainingResult<SubEpochReport> {
        // The epoch-level reload already covered the first sub-epoch.
        let reloaded = if index > 0 { self.reload_data().await? } else { false };
        info!("Sub-epoch {}/{}", index + 1, self.config.sub_epochs);

        let selection = select_files(
            &mut self.cursor,
            self.config.batches_per_sub_epoch(),
            self.config.max_files_per_sub_epoch,
            &mut self.rng,
        );

        let train = self
            .driver
            .train_sub_epoch(
                &mut self.backend,
                &selection,
                self.cursor.len(),
                &mut self.journal,
                self.progress.as_ref(),
            )
            .await?;

        if train.is_some() {
            if let Some(swa) = self.swa.as_mut() {
                swa.accumulate(&self.backend)?;
                debug!(weight = swa.weight(), updates = swa.updates(), "Accumulated averaged weights");
            }
        }

        Ok(SubEpochReport {
            index,
            reloaded,
            files: selection.files,
            batches_selected: selection.batches,
            train,
        })
    }

    async fn export_if_due(&self) -> TrainingResult<Option<ExportOutcome>> {
        let Some(exporter) = &self.exporter else {
            return Ok(None);
        };

        let identity = SnapshotIdentity {
            total_samples: self.backend.global_step() * self.config.batch_size,
            row_watermark: self.watcher.row_watermark(),
        };
        let averaged = self.swa.as_ref().and_then(SwaAccumulator::averaged);
        if self.swa.is_some() && averaged.is_none() {
            warn!("Weight averaging enabled but nothing accumulated yet, exporting without averaged snapshot");
        }
        let request = ExportRequest {
            identity,
            model_config: &self.model_config,
            history: self.journal.history(),
            averaged,
        };
        Ok(Some(exporter.export_if_absent(&self.backend, request).await?))
    }
}
