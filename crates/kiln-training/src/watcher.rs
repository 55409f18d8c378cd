//! Detects dataset swaps and loads new manifests.
//!
//! The dataset root is usually a symlink that an external producer repoints at
//! a freshly written directory. The watcher compares canonical paths, so a new
//! target is picked up at the next reload point while the old one keeps being
//! read until then.

use crate::dataset::{
    load_manifest, load_record_infos, DatasetManifest, RecordFileInfo, MANIFEST_FILE, TRAIN_SUBDIR, VAL_SUBDIR,
};
use crate::error::TrainingResult;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// A fully loaded dataset version.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    /// Canonical dataset directory.
    pub dir: PathBuf,
    pub manifest: DatasetManifest,
    pub train_files: Vec<RecordFileInfo>,
}

#[derive(Debug, Clone)]
pub enum ReloadOutcome {
    Unchanged,
    Reloaded(DatasetSnapshot),
}

#[derive(Debug, Clone)]
pub struct ManifestWatcher {
    data_dir: PathBuf,
    record_extension: String,
    backoff: Duration,
    current_dir: Option<PathBuf>,
    row_watermark: u64,
}

impl ManifestWatcher {
    #[must_use]
    pub fn new(data_dir: PathBuf, record_extension: String, backoff: Duration) -> Self {
        Self { data_dir, record_extension, backoff, current_dir: None, row_watermark: 0 }
    }

    /// Canonical directory of the currently loaded dataset.
    #[must_use]
    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    #[must_use]
    pub fn row_watermark(&self) -> u64 {
        self.row_watermark
    }

    #[must_use]
    pub fn val_dir(&self) -> Option<PathBuf> {
        self.current_dir.as_ref().map(|dir| dir.join(VAL_SUBDIR))
    }

    #[must_use]
    pub fn record_extension(&self) -> &str {
        &self.record_extension
    }

    /// Load the dataset if its canonical location changed since the last load.
    ///
    /// Waits and retries for as long as the root or its manifest is missing.
    /// A manifest or sidecar that exists but cannot be parsed is an error.
    pub async fn maybe_reload(&mut self) -> TrainingResult<ReloadOutcome> {
        loop {
            let canonical = match std::fs::canonicalize(&self.data_dir) {
                Ok(path) => path,
                Err(e) => {
                    warn!(
                        path = %self.data_dir.display(),
                        error = %e,
                        "Training data path does not exist, waiting and trying again later"
                    );
                    tokio::time::sleep(self.backoff).await;
                    continue;
                }
            };

            if self.current_dir.as_deref() == Some(canonical.as_path()) {
                return Ok(ReloadOutcome::Unchanged);
            }

            let manifest_path = canonical.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                warn!(
                    path = %manifest_path.display(),
                    "Training data json file does not exist, waiting and trying again later"
                );
                tokio::time::sleep(self.backoff).await;
                continue;
            }

            let manifest = load_manifest(&manifest_path)?;
            let train_files = load_record_infos(&canonical.join(TRAIN_SUBDIR), &self.record_extension)?;

            info!(
                path = %canonical.display(),
                rows = ?manifest.range,
                train_files = train_files.len(),
                "Updated training data"
            );
            self.current_dir = Some(canonical.clone());
            self.row_watermark = manifest.row_watermark();

            return Ok(ReloadOutcome::Reloaded(DatasetSnapshot { dir: canonical, manifest, train_files }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_dataset(dir: &Path, end: u64, counts: &[i64]) {
        std::fs::create_dir_all(dir.join(TRAIN_SUBDIR)).unwrap();
        let mut names = Vec::new();
        for (i, count) in counts.iter().enumerate() {
            let name = format!("part{i}.tfrecord");
            std::fs::write(dir.join(TRAIN_SUBDIR).join(&name), b"").unwrap();
            std::fs::write(
                dir.join(TRAIN_SUBDIR).join(format!("part{i}.json")),
                format!(r#"{{"num_batches": {count}}}"#),
            )
            .unwrap();
            names.push(name);
        }
        let tmp = dir.join("train.json.partial");
        std::fs::write(&tmp, serde_json::json!({"files": names, "range": [0, end]}).to_string()).unwrap();
        std::fs::rename(&tmp, dir.join(MANIFEST_FILE)).unwrap();
    }

    #[tokio::test]
    async fn test_loads_then_reports_unchanged() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        write_dataset(&data, 1000, &[40, 40, 40]);

        let mut watcher = ManifestWatcher::new(data.clone(), "tfrecord".to_string(), Duration::from_millis(5));
        let ReloadOutcome::Reloaded(snapshot) = watcher.maybe_reload().await.unwrap() else {
            panic!("expected reload");
        };
        assert_eq!(snapshot.train_files.len(), 3);
        assert_eq!(snapshot.manifest.row_watermark(), 1000);
        assert_eq!(watcher.row_watermark(), 1000);
        assert_eq!(watcher.val_dir(), Some(std::fs::canonicalize(&data).unwrap().join(VAL_SUBDIR)));

        assert!(matches!(watcher.maybe_reload().await.unwrap(), ReloadOutcome::Unchanged));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_swap_is_detected() {
        let temp = TempDir::new().unwrap();
        let v1 = temp.path().join("v1");
        let v2 = temp.path().join("v2");
        write_dataset(&v1, 1000, &[10]);
        write_dataset(&v2, 2500, &[10, 20]);
        let link = temp.path().join("current");
        std::os::unix::fs::symlink(&v1, &link).unwrap();

        let mut watcher = ManifestWatcher::new(link.clone(), "tfrecord".to_string(), Duration::from_millis(5));
        assert!(matches!(watcher.maybe_reload().await.unwrap(), ReloadOutcome::Reloaded(_)));

        std::fs::remove_file(&link).unwrap();
        std::os::unix::fs::symlink(&v2, &link).unwrap();

        let ReloadOutcome::Reloaded(snapshot) = watcher.maybe_reload().await.unwrap() else {
            panic!("expected reload after swap");
        };
        assert_eq!(snapshot.train_files.len(), 2);
        assert_eq!(watcher.row_watermark(), 2500);
    }

    #[tokio::test]
    async fn test_waits_for_manifest_to_appear() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let writer_dir = data.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            write_dataset(&writer_dir, 64, &[1]);
        });

        let mut watcher = ManifestWatcher::new(data, "tfrecord".to_string(), Duration::from_millis(5));
        let outcome = watcher.maybe_reload().await.unwrap();
        writer.await.unwrap();
        assert!(matches!(outcome, ReloadOutcome::Reloaded(_)));
        assert_eq!(watcher.row_watermark(), 64);
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_fatal() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join(MANIFEST_FILE), b"{not json").unwrap();

        let mut watcher = ManifestWatcher::new(data, "tfrecord".to_string(), Duration::from_millis(5));
        assert!(watcher.maybe_reload().await.is_err());
    }
}
