//! Kiln Training
//!
//! Training-data lifecycle and checkpoint publication for:
//! - Watching a swappable dataset directory (`ManifestWatcher`)
//! - Choosing record files for each sub-epoch (`select_files`)
//! - Driving a model backend through training and validation (`TrainingBackend`)
//! - Averaging weights across sub-epochs (`SwaAccumulator`)
//! - Journaling training history durably (`HistoryJournal`)
//! - Publishing snapshots atomically and backing up checkpoints
//! - Running the whole epoch loop (`Orchestrator`)

pub mod artifacts;
pub mod atomic;
pub mod backup;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod export;
pub mod history;
pub mod layout;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod selector;
pub mod simulated;
pub mod swa;
pub mod trainer;
pub mod watcher;

pub use artifacts::{ArtifactKind, ExportArtifact, ExportManifest};
pub use backup::{BackupOutcome, BackupScheduler};
pub use config::{PartialConfig, TrainConfig};
pub use dataset::{DatasetManifest, RecordFileInfo, RowRange};
pub use driver::TrainingStepDriver;
pub use error::{TrainingError, TrainingResult};
pub use export::{ExportOutcome, ExportRequest, SnapshotExporter, SnapshotIdentity};
pub use history::{read_history, HistoryEntry, HistoryEvent, HistoryJournal, HistorySource, TrainHistory};
pub use layout::RunLayout;
pub use orchestrator::{EpochReport, LoopPhase, Orchestrator, SubEpochReport};
pub use progress::{ProgressEvent, ProgressSink, TracingProgressSink};
pub use registry::{discover_snapshots, latest_snapshot, PublishedSnapshot};
pub use selector::{select_files, FileCursor, Selection};
pub use simulated::{SimulatedBackend, SimulatedModel};
pub use swa::SwaAccumulator;
pub use trainer::{BatchStreamSpec, EvalOutcome, ParameterSet, TrainOutcome, TrainRequest, TrainingBackend};
pub use watcher::{DatasetSnapshot, ManifestWatcher, ReloadOutcome};
