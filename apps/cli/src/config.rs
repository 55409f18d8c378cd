//! Training configuration loading and merging.

use crate::commands::types::TrainArgs;
use anyhow::{Context, Result};
use kiln_training::{PartialConfig, TrainConfig};

/// Command-line flags as a configuration layer.
fn cli_layer(args: &TrainArgs) -> PartialConfig {
    PartialConfig {
        run_dir: args.run_dir.clone(),
        data_dir: args.data_dir.clone(),
        export_dir: args.export_dir.clone(),
        export_prefix: args.export_prefix.clone(),
        batch_size: args.batch_size,
        samples_per_epoch: args.samples_per_epoch,
        sub_epochs: args.sub_epochs,
        swa_scale: args.swa_scale,
        lr_scale: args.lr_scale,
        no_export: args.no_export.then_some(true),
        verbose: args.verbose.then_some(true),
        record_extension: args.record_extension.clone(),
        reload_backoff_secs: args.reload_backoff_secs,
        backup_interval_hours: args.backup_interval_hours,
        export_settle_ms: args.export_settle_ms,
        max_files_per_sub_epoch: args.max_files_per_sub_epoch,
        seed: args.seed,
    }
}

/// Resolve the training configuration.
///
/// Configuration precedence:
/// 1. CLI arguments
/// 2. The `--config` TOML file
/// 3. Defaults
pub fn resolve(args: &TrainArgs) -> Result<TrainConfig> {
    let mut layers = match &args.config {
        Some(path) => PartialConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => PartialConfig::default(),
    };
    layers.merge(cli_layer(args));
    layers.resolve().context("Invalid training configuration")
}
