//! Orchestrator configuration.
//!
//! Every recognized option lives in [`TrainConfig`]. Sources are layered as
//! [`PartialConfig`] values (TOML file, then command-line overrides) and
//! resolved once at startup by [`PartialConfig::resolve`], which fills defaults
//! and validates the result.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RECORD_EXTENSION: &str = "tfrecord";
pub const DEFAULT_RELOAD_BACKOFF_SECS: u64 = 30;
pub const DEFAULT_BACKUP_INTERVAL_HOURS: u64 = 3;
pub const DEFAULT_EXPORT_SETTLE_MS: u64 = 1000;
pub const DEFAULT_MAX_FILES_PER_SUB_EPOCH: usize = 100_000;
const MAX_BACKUP_INTERVAL_HOURS: u64 = 24 * 365 * 100;

/// Fully resolved orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Directory for training state (history, checkpoints, logs).
    pub run_dir: PathBuf,
    /// Dataset root. May be a symlink that an external producer swaps.
    pub data_dir: PathBuf,
    /// Directory that receives published snapshots.
    pub export_dir: PathBuf,
    /// Prefix for published snapshot names.
    pub export_prefix: String,
    /// Expected batch size of the record files.
    pub batch_size: u64,
    /// Number of samples that make up one epoch.
    pub samples_per_epoch: u64,
    /// Number of reload-and-train units per epoch.
    pub sub_epochs: u32,
    /// Number of sub-epochs averaged together in expectation. Enables SWA.
    pub swa_scale: Option<f64>,
    /// Multiplier on the backend's learning-rate schedule.
    pub lr_scale: Option<f64>,
    pub no_export: bool,
    pub verbose: bool,
    pub record_extension: String,
    pub reload_backoff_secs: u64,
    pub backup_interval_hours: u64,
    pub export_settle_ms: u64,
    pub max_files_per_sub_epoch: usize,
    /// Seed for file shuffling and selection. Entropy when unset.
    pub seed: Option<u64>,
}

impl TrainConfig {
    /// Batches in one epoch, rounded to the nearest whole batch.
    #[must_use]
    pub fn batches_per_epoch(&self) -> u64 {
        (self.samples_per_epoch as f64 / self.batch_size as f64).round() as u64
    }

    /// Fractional batch target for one sub-epoch.
    #[must_use]
    pub fn batches_per_sub_epoch(&self) -> f64 {
        self.batches_per_epoch() as f64 / f64::from(self.sub_epochs)
    }

    #[must_use]
    pub fn reload_backoff(&self) -> Duration {
        Duration::from_secs(self.reload_backoff_secs)
    }

    #[must_use]
    pub fn export_settle(&self) -> Duration {
        Duration::from_millis(self.export_settle_ms)
    }

    #[must_use]
    pub fn backup_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.backup_interval_hours).unwrap_or(MAX_BACKUP_INTERVAL_HOURS as i64))
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.export_prefix.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("export_prefix is required".to_string()));
        }
        if self.export_prefix.contains(['/', '\\']) {
            return Err(TrainingError::InvalidConfig(format!(
                "export_prefix must not contain path separators: {}",
                self.export_prefix
            )));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        if self.samples_per_epoch == 0 {
            return Err(TrainingError::InvalidConfig("samples_per_epoch must be >= 1".to_string()));
        }
        if self.sub_epochs == 0 {
            return Err(TrainingError::InvalidConfig("sub_epochs must be >= 1".to_string()));
        }
        if let Some(scale) = self.swa_scale {
            if !scale.is_finite() || scale <= 1.0 {
                return Err(TrainingError::InvalidConfig(format!(
                    "swa_scale must be a finite value > 1, got {scale}"
                )));
            }
        }
        if let Some(lr_scale) = self.lr_scale {
            if !lr_scale.is_finite() || lr_scale <= 0.0 {
                return Err(TrainingError::InvalidConfig(format!(
                    "lr_scale must be a finite value > 0, got {lr_scale}"
                )));
            }
        }
        if self.record_extension.trim().is_empty() || self.record_extension == "json" {
            return Err(TrainingError::InvalidConfig(format!(
                "record_extension must be non-empty and distinct from the sidecar extension, got {:?}",
                self.record_extension
            )));
        }
        if self.backup_interval_hours == 0 || self.backup_interval_hours > MAX_BACKUP_INTERVAL_HOURS {
            return Err(TrainingError::InvalidConfig(format!(
                "backup_interval_hours must be between 1 and {MAX_BACKUP_INTERVAL_HOURS}"
            )));
        }
        if self.max_files_per_sub_epoch == 0 {
            return Err(TrainingError::InvalidConfig("max_files_per_sub_epoch must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// One layer of configuration. Unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    #[serde(default)]
    pub run_dir: Option<PathBuf>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
    #[serde(default)]
    pub export_prefix: Option<String>,
    #[serde(default)]
    pub batch_size: Option<u64>,
    #[serde(default)]
    pub samples_per_epoch: Option<u64>,
    #[serde(default)]
    pub sub_epochs: Option<u32>,
    #[serde(default)]
    pub swa_scale: Option<f64>,
    #[serde(default)]
    pub lr_scale: Option<f64>,
    #[serde(default)]
    pub no_export: Option<bool>,
    #[serde(default)]
    pub verbose: Option<bool>,
    #[serde(default)]
    pub record_extension: Option<String>,
    #[serde(default)]
    pub reload_backoff_secs: Option<u64>,
    #[serde(default)]
    pub backup_interval_hours: Option<u64>,
    #[serde(default)]
    pub export_settle_ms: Option<u64>,
    #[serde(default)]
    pub max_files_per_sub_epoch: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PartialConfig {
    /// Load a configuration layer from a TOML file.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TrainingError::io_at(path, e))?;
        toml::from_str(&content)
            .map_err(|e| TrainingError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Merge another layer into this one. Values set in `other` win.
    pub fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            run_dir,
            data_dir,
            export_dir,
            export_prefix,
            batch_size,
            samples_per_epoch,
            sub_epochs,
            swa_scale,
            lr_scale,
            no_export,
            verbose,
            record_extension,
            reload_backoff_secs,
            backup_interval_hours,
            export_settle_ms,
            max_files_per_sub_epoch,
            seed,
        );
    }

    /// Fill defaults, check required options and validate.
    pub fn resolve(self) -> TrainingResult<TrainConfig> {
        fn required<T>(value: Option<T>, name: &str) -> TrainingResult<T> {
            value.ok_or_else(|| TrainingError::InvalidConfig(format!("{name} is required")))
        }

        let config = TrainConfig {
            run_dir: required(self.run_dir, "run_dir")?,
            data_dir: required(self.data_dir, "data_dir")?,
            export_dir: required(self.export_dir, "export_dir")?,
            export_prefix: required(self.export_prefix, "export_prefix")?,
            batch_size: required(self.batch_size, "batch_size")?,
            samples_per_epoch: required(self.samples_per_epoch, "samples_per_epoch")?,
            sub_epochs: required(self.sub_epochs, "sub_epochs")?,
            swa_scale: self.swa_scale,
            lr_scale: self.lr_scale,
            no_export: self.no_export.unwrap_or(false),
            verbose: self.verbose.unwrap_or(false),
            record_extension: self
                .record_extension
                .unwrap_or_else(|| DEFAULT_RECORD_EXTENSION.to_string()),
            reload_backoff_secs: self.reload_backoff_secs.unwrap_or(DEFAULT_RELOAD_BACKOFF_SECS),
            backup_interval_hours: self.backup_interval_hours.unwrap_or(DEFAULT_BACKUP_INTERVAL_HOURS),
            export_settle_ms: self.export_settle_ms.unwrap_or(DEFAULT_EXPORT_SETTLE_MS),
            max_files_per_sub_epoch: self
                .max_files_per_sub_epoch
                .unwrap_or(DEFAULT_MAX_FILES_PER_SUB_EPOCH),
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal() -> PartialConfig {
        PartialConfig {
            run_dir: Some(PathBuf::from("/tmp/run")),
            data_dir: Some(PathBuf::from("/tmp/data")),
            export_dir: Some(PathBuf::from("/tmp/export")),
            export_prefix: Some("net".to_string()),
            batch_size: Some(256),
            samples_per_epoch: Some(1_000_000),
            sub_epochs: Some(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let config = minimal().resolve().unwrap();
        assert_eq!(config.record_extension, "tfrecord");
        assert_eq!(config.reload_backoff(), Duration::from_secs(30));
        assert_eq!(config.backup_interval(), chrono::Duration::hours(3));
        assert_eq!(config.max_files_per_sub_epoch, 100_000);
        assert!(!config.no_export);
        assert!(config.swa_scale.is_none());
    }

    #[test]
    fn test_resolve_requires_run_dir() {
        let mut partial = minimal();
        partial.run_dir = None;
        let err = partial.resolve().unwrap_err();
        assert!(err.to_string().contains("run_dir is required"));
    }

    #[test]
    fn test_batch_targets() {
        let config = minimal().resolve().unwrap();
        // 1_000_000 / 256 = 3906.25 -> 3906 batches, split four ways.
        assert_eq!(config.batches_per_epoch(), 3906);
        assert!((config.batches_per_sub_epoch() - 976.5).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut partial = minimal();
        partial.batch_size = Some(0);
        assert!(partial.resolve().is_err());

        let mut partial = minimal();
        partial.swa_scale = Some(0.5);
        assert!(partial.resolve().is_err());

        let mut partial = minimal();
        partial.swa_scale = Some(1.0);
        assert!(partial.resolve().is_err());

        let mut partial = minimal();
        partial.lr_scale = Some(-1.0);
        assert!(partial.resolve().is_err());

        let mut partial = minimal();
        partial.export_prefix = Some("a/b".to_string());
        assert!(partial.resolve().is_err());

        let mut partial = minimal();
        partial.record_extension = Some("json".to_string());
        assert!(partial.resolve().is_err());
    }

    #[test]
    fn test_merge_prefers_later_layer() {
        let mut base = minimal();
        base.merge(PartialConfig {
            sub_epochs: Some(8),
            swa_scale: Some(4.0),
            ..Default::default()
        });
        let config = base.resolve().unwrap();
        assert_eq!(config.sub_epochs, 8);
        assert_eq!(config.swa_scale, Some(4.0));
        assert_eq!(config.batch_size, 256);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kiln.toml");
        std::fs::write(
            &path,
            r#"
run_dir = "/srv/run"
data_dir = "/srv/data"
export_dir = "/srv/export"
export_prefix = "b20"
batch_size = 128
samples_per_epoch = 500000
sub_epochs = 2
swa_scale = 8.0
"#,
        )
        .unwrap();

        let config = PartialConfig::load_from_file(&path).unwrap().resolve().unwrap();
        assert_eq!(config.export_prefix, "b20");
        assert_eq!(config.swa_scale, Some(8.0));
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kiln.toml");
        std::fs::write(&path, "bogus_option = 3\n").unwrap();
        assert!(matches!(
            PartialConfig::load_from_file(&path),
            Err(TrainingError::InvalidConfig(_))
        ));
    }
}
