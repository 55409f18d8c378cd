//! Snapshot publication: idempotence, atomic visibility, concurrent exporters
//! and checksums.

mod common;

use async_trait::async_trait;
use common::{write_record, PREFIX};
use kiln_training::artifacts::{sha256_file, EXPORT_MANIFEST_FILE};
use kiln_training::export::{AVERAGED_SNAPSHOT_DIR, SNAPSHOT_DIR};
use kiln_training::{
    BatchStreamSpec, EvalOutcome, ExportManifest, ExportOutcome, ExportRequest, ParameterSet, ProgressSink,
    SimulatedBackend, SimulatedModel, SnapshotExporter, SnapshotIdentity, TrainHistory, TrainOutcome, TrainRequest,
    TrainingBackend, TrainingResult, TracingProgressSink,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

async fn trained_backend(root: &Path) -> SimulatedBackend {
    let run = root.join("run");
    std::fs::create_dir_all(&run).unwrap();
    let file = root.join("train").join(write_record(&root.join("train"), "part", 4));
    let mut backend = SimulatedBackend::new(run, SimulatedModel::default()).unwrap();
    let request = TrainRequest { stream: BatchStreamSpec::training(vec![file], 32), batches_per_epoch: 10, lr_scale: None };
    backend.train(&request, &TracingProgressSink).await.unwrap();
    backend
}

/// Delegates to a simulated backend but keeps exporting for `delay` after
/// the snapshot directory has been written.
struct SlowExportBackend {
    inner: SimulatedBackend,
    delay: Duration,
}

#[async_trait]
impl TrainingBackend for SlowExportBackend {
    fn id(&self) -> &'static str {
        self.inner.id()
    }

    fn model_config(&self) -> serde_json::Value {
        self.inner.model_config()
    }

    fn global_step(&self) -> u64 {
        self.inner.global_step()
    }

    async fn train(&mut self, request: &TrainRequest, progress: &dyn ProgressSink) -> TrainingResult<TrainOutcome> {
        self.inner.train(request, progress).await
    }

    async fn evaluate(&mut self, stream: &BatchStreamSpec, progress: &dyn ProgressSink) -> TrainingResult<EvalOutcome> {
        self.inner.evaluate(stream, progress).await
    }

    fn parameter_names(&self) -> Vec<String> {
        self.inner.parameter_names()
    }

    fn parameter(&self, name: &str) -> TrainingResult<Vec<f32>> {
        self.inner.parameter(name)
    }

    async fn export_snapshot(&self, dest: &Path) -> TrainingResult<()> {
        self.inner.export_snapshot(dest).await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn save_parameters(&self, params: &ParameterSet, dest: &Path) -> TrainingResult<()> {
        self.inner.save_parameters(params, dest).await
    }

    fn latest_checkpoint(&self) -> Option<PathBuf> {
        self.inner.latest_checkpoint()
    }
}

/// In-progress attempt directories for `identity`.
fn attempt_dirs(exporter: &SnapshotExporter, identity: &SnapshotIdentity) -> Vec<PathBuf> {
    let prefix = exporter.temp_dir_prefix(identity);
    let Ok(entries) = std::fs::read_dir(exporter.export_dir()) else {
        return Vec::new();
    };
    entries
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.file_name().unwrap().to_string_lossy().starts_with(&prefix))
        .collect()
}

fn request<'a>(
    identity: SnapshotIdentity,
    config: &'a serde_json::Value,
    history: &'a TrainHistory,
    averaged: Option<ParameterSet>,
) -> ExportRequest<'a> {
    ExportRequest { identity, model_config: config, history, averaged }
}

#[tokio::test]
async fn test_export_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let backend = trained_backend(temp.path()).await;
    let exporter = SnapshotExporter::new(temp.path().join("exports"), PREFIX.to_string(), Duration::ZERO);
    std::fs::create_dir_all(exporter.export_dir()).unwrap();

    let config = backend.model_config();
    let history = TrainHistory::default();
    let identity = SnapshotIdentity { total_samples: 128, row_watermark: 900 };

    let first = exporter.export_if_absent(&backend, request(identity, &config, &history, None)).await.unwrap();
    let final_path = exporter.final_path(&identity);
    assert_eq!(first, ExportOutcome::Published(final_path.clone()));
    let manifest_before = std::fs::read(final_path.join(EXPORT_MANIFEST_FILE)).unwrap();

    let second = exporter.export_if_absent(&backend, request(identity, &config, &history, None)).await.unwrap();
    assert_eq!(second, ExportOutcome::AlreadyPublished(final_path.clone()));
    assert_eq!(std::fs::read(final_path.join(EXPORT_MANIFEST_FILE)).unwrap(), manifest_before);
    assert!(attempt_dirs(&exporter, &identity).is_empty());
}

#[tokio::test]
async fn test_final_path_only_appears_complete() {
    let temp = TempDir::new().unwrap();
    let backend = trained_backend(temp.path()).await;
    let exporter = SnapshotExporter::new(temp.path().join("exports"), PREFIX.to_string(), Duration::from_millis(150));
    std::fs::create_dir_all(exporter.export_dir()).unwrap();

    let config = backend.model_config();
    let history = TrainHistory::default();
    let identity = SnapshotIdentity { total_samples: 128, row_watermark: 900 };
    let final_path = exporter.final_path(&identity);

    let poll = async {
        let mut saw_tmp = false;
        loop {
            if !attempt_dirs(&exporter, &identity).is_empty() {
                saw_tmp = true;
            }
            if final_path.exists() {
                assert!(final_path.join(EXPORT_MANIFEST_FILE).is_file());
                assert!(final_path.join(SNAPSHOT_DIR).join("params.json").is_file());
                assert!(final_path.join(SNAPSHOT_DIR).join("trainhistory.json").is_file());
                return saw_tmp;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    let export = exporter.export_if_absent(&backend, request(identity, &config, &history, None));

    let (saw_tmp, outcome) = tokio::join!(poll, export);
    assert!(saw_tmp);
    assert_eq!(outcome.unwrap(), ExportOutcome::Published(final_path));
    assert!(attempt_dirs(&exporter, &identity).is_empty());
}

#[tokio::test]
async fn test_overlapping_exports_publish_one_complete_snapshot() {
    let temp = TempDir::new().unwrap();
    let first = trained_backend(&temp.path().join("a")).await;
    let second = SlowExportBackend {
        inner: trained_backend(&temp.path().join("b")).await,
        delay: Duration::from_millis(300),
    };
    let exporter = SnapshotExporter::new(temp.path().join("exports"), PREFIX.to_string(), Duration::from_millis(100));
    std::fs::create_dir_all(exporter.export_dir()).unwrap();

    let config = first.model_config();
    let history = TrainHistory::default();
    let identity = SnapshotIdentity { total_samples: 128, row_watermark: 900 };
    let final_path = exporter.final_path(&identity);

    let early = exporter.export_if_absent(&first, request(identity, &config, &history, None));
    let late = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        exporter.export_if_absent(&second, request(identity, &config, &history, None)).await
    };
    let (early, late) = tokio::join!(early, late);

    assert_eq!(early.unwrap(), ExportOutcome::Published(final_path.clone()));
    assert_eq!(late.unwrap(), ExportOutcome::AlreadyPublished(final_path.clone()));
    assert!(final_path.join(EXPORT_MANIFEST_FILE).is_file());
    assert!(final_path.join(SNAPSHOT_DIR).join("params.json").is_file());
    assert!(attempt_dirs(&exporter, &identity).is_empty());
}

#[tokio::test]
async fn test_averaged_snapshot_layout_and_checksums() {
    let temp = TempDir::new().unwrap();
    let backend = trained_backend(temp.path()).await;
    let exporter = SnapshotExporter::new(temp.path().join("exports"), PREFIX.to_string(), Duration::ZERO);
    std::fs::create_dir_all(exporter.export_dir()).unwrap();

    let averaged: ParameterSet = backend
        .parameter_names()
        .into_iter()
        .map(|name| {
            let len = backend.parameter(&name).unwrap().len();
            (name, vec![0.25; len])
        })
        .collect();
    let config = backend.model_config();
    let history = TrainHistory::default();
    let identity = SnapshotIdentity { total_samples: 128, row_watermark: 900 };

    exporter.export_if_absent(&backend, request(identity, &config, &history, Some(averaged))).await.unwrap();

    let root = exporter.final_path(&identity);
    for dir in [root.clone(), root.join(SNAPSHOT_DIR), root.join(AVERAGED_SNAPSHOT_DIR)] {
        assert!(dir.join("model.config.json").is_file(), "{}", dir.display());
        assert!(dir.join("trainhistory.json").is_file(), "{}", dir.display());
    }

    let manifest: ExportManifest =
        serde_json::from_slice(&std::fs::read(root.join(EXPORT_MANIFEST_FILE)).unwrap()).unwrap();
    assert!(manifest.averaged);
    assert_eq!(manifest.name, identity.dir_name(PREFIX));
    assert_eq!(manifest.backend, "simulated");
    assert!(manifest.artifacts.iter().any(|a| a.path == PathBuf::from(AVERAGED_SNAPSHOT_DIR).join("params.json")));
    for artifact in &manifest.artifacts {
        assert_eq!(sha256_file(&root.join(&artifact.path)).unwrap(), artifact.sha256);
    }
}

#[tokio::test]
async fn test_foreign_partial_export_is_left_alone() {
    let temp = TempDir::new().unwrap();
    let backend = trained_backend(temp.path()).await;
    let exporter = SnapshotExporter::new(temp.path().join("exports"), PREFIX.to_string(), Duration::ZERO);
    let identity = SnapshotIdentity { total_samples: 128, row_watermark: 900 };

    let foreign = exporter.export_dir().join(format!("{}other-attempt", exporter.temp_dir_prefix(&identity)));
    std::fs::create_dir_all(foreign.join("leftover")).unwrap();
    std::fs::write(foreign.join("leftover").join("junk"), b"junk").unwrap();

    let config = backend.model_config();
    let history = TrainHistory::default();
    let outcome = exporter.export_if_absent(&backend, request(identity, &config, &history, None)).await.unwrap();

    let root = exporter.final_path(&identity);
    assert_eq!(outcome, ExportOutcome::Published(root.clone()));
    assert!(!root.join("leftover").exists());
    assert!(foreign.join("leftover").join("junk").is_file());
    assert_eq!(attempt_dirs(&exporter, &identity), vec![foreign]);
}
