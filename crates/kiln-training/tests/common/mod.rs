//! Shared fixtures for kiln-training integration tests.

#![allow(dead_code)]

use kiln_training::{SimulatedBackend, SimulatedModel, TrainConfig};
use std::path::{Path, PathBuf};

pub const PREFIX: &str = "testnet";
pub const BATCH_SIZE: u64 = 32;

/// Write a dataset version: `train.json`, `train/` record files with
/// sidecars, and optionally `val/` record files.
pub fn write_dataset(dir: &Path, range: (u64, u64), train_batches: &[i64], val_batches: &[i64]) {
    let mut names = Vec::new();
    for (i, &batches) in train_batches.iter().enumerate() {
        names.push(write_record(&dir.join("train"), &format!("train-{i:04}"), batches));
    }
    for (i, &batches) in val_batches.iter().enumerate() {
        write_record(&dir.join("val"), &format!("val-{i:04}"), batches);
    }

    let manifest = serde_json::json!({ "files": names, "range": [range.0, range.1] });
    let tmp = dir.join("train.json.tmp");
    std::fs::write(&tmp, manifest.to_string()).unwrap();
    std::fs::rename(&tmp, dir.join("train.json")).unwrap();
}

pub fn write_record(dir: &Path, stem: &str, batches: i64) -> String {
    std::fs::create_dir_all(dir).unwrap();
    let name = format!("{stem}.tfrecord");
    std::fs::write(dir.join(&name), format!("records for {stem}")).unwrap();
    std::fs::write(dir.join(format!("{stem}.json")), format!(r#"{{"num_batches": {batches}}}"#)).unwrap();
    name
}

/// A config with zero settle delay, a short backoff and a fixed seed.
pub fn test_config(root: &Path, data_dir: PathBuf) -> TrainConfig {
    TrainConfig {
        run_dir: root.join("run"),
        data_dir,
        export_dir: root.join("exports"),
        export_prefix: PREFIX.to_string(),
        batch_size: BATCH_SIZE,
        samples_per_epoch: BATCH_SIZE * 200,
        sub_epochs: 2,
        swa_scale: None,
        lr_scale: None,
        no_export: false,
        verbose: false,
        record_extension: "tfrecord".to_string(),
        reload_backoff_secs: 0,
        backup_interval_hours: 3,
        export_settle_ms: 0,
        max_files_per_sub_epoch: 100_000,
        seed: Some(7),
    }
}

pub fn backend_for(config: &TrainConfig) -> SimulatedBackend {
    SimulatedBackend::new(config.run_dir.clone(), SimulatedModel::default()).unwrap()
}
