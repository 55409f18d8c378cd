//! Command type definitions shared between main.rs and tests.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct TrainArgs {
    /// TOML file with training options
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run directory (history, checkpoints, logs)
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    /// Dataset root, usually a symlink the data producer swaps
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory that receives published snapshots
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Name prefix for published snapshots
    #[arg(long)]
    pub export_prefix: Option<String>,

    /// Batch size of the record files
    #[arg(long)]
    pub batch_size: Option<u64>,

    /// Samples per epoch
    #[arg(long)]
    pub samples_per_epoch: Option<u64>,

    /// Reload-and-train units per epoch
    #[arg(long)]
    pub sub_epochs: Option<u32>,

    /// Enable weight averaging over roughly this many sub-epochs
    #[arg(long)]
    pub swa_scale: Option<f64>,

    /// Learning-rate multiplier
    #[arg(long)]
    pub lr_scale: Option<f64>,

    /// Never publish snapshots
    #[arg(long)]
    pub no_export: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Extension of record files (sidecars are always .json)
    #[arg(long)]
    pub record_extension: Option<String>,

    /// Seconds to wait before checking for missing data again
    #[arg(long)]
    pub reload_backoff_secs: Option<u64>,

    /// Hours between long-term checkpoint backups
    #[arg(long)]
    pub backup_interval_hours: Option<u64>,

    /// Milliseconds to wait before publishing a finished export
    #[arg(long)]
    pub export_settle_ms: Option<u64>,

    /// Upper bound on files selected for one sub-epoch
    #[arg(long)]
    pub max_files_per_sub_epoch: Option<usize>,

    /// Seed for file shuffling and selection
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportsArgs {
    /// Export directory to scan
    #[arg(long)]
    pub export_dir: PathBuf,

    /// Snapshot name prefix
    #[arg(long)]
    pub prefix: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Run directory containing trainhistory.json
    #[arg(long)]
    pub run_dir: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Print every recorded event
    #[arg(long)]
    pub events: bool,
}
