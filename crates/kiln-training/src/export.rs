//! Publishing trained snapshots.
//!
//! A snapshot is assembled in `<name>.tmp-<uuid>` next to its final location
//! and renamed into place only once every file is written, so anything that
//! sees `<export_dir>/<name>` sees a complete snapshot. Every attempt owns its
//! temp directory; concurrent exporters of the same identity never touch each
//! other's work and the loser of the rename reports the identity as already
//! published. Names are derived from the [`SnapshotIdentity`]; an identity
//! that is already published is never touched again.

use crate::artifacts::{collect_artifacts, ExportManifest, EXPORT_MANIFEST_FILE};
use crate::atomic::write_json_synced;
use crate::error::{TrainingError, TrainingResult};
use crate::history::TrainHistory;
use crate::layout::{HISTORY_FILE, MODEL_CONFIG_FILE};
use crate::trainer::{ParameterSet, TrainingBackend};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Subdirectory holding the primary trained snapshot.
pub const SNAPSHOT_DIR: &str = "saved_model";
/// Subdirectory holding the weight-averaged snapshot.
pub const AVERAGED_SNAPSHOT_DIR: &str = "swa_saved_model";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotIdentity {
    pub total_samples: u64,
    pub row_watermark: u64,
}

impl SnapshotIdentity {
    #[must_use]
    pub fn dir_name(&self, prefix: &str) -> String {
        format!("{prefix}-s{}-d{}", self.total_samples, self.row_watermark)
    }

    /// Inverse of [`SnapshotIdentity::dir_name`].
    #[must_use]
    pub fn parse(prefix: &str, name: &str) -> Option<Self> {
        let rest = name.strip_prefix(prefix)?.strip_prefix("-s")?;
        let (samples, rows) = rest.split_once("-d")?;
        let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !is_number(samples) || !is_number(rows) {
            return None;
        }
        Some(Self { total_samples: samples.parse().ok()?, row_watermark: rows.parse().ok()? })
    }
}

/// Everything a snapshot carries besides the backend's own files.
#[derive(Debug, Clone)]
pub struct ExportRequest<'a> {
    pub identity: SnapshotIdentity,
    pub model_config: &'a serde_json::Value,
    pub history: &'a TrainHistory,
    pub averaged: Option<ParameterSet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Published(PathBuf),
    AlreadyPublished(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    export_dir: PathBuf,
    prefix: String,
    settle: Duration,
}

impl SnapshotExporter {
    #[must_use]
    pub fn new(export_dir: PathBuf, prefix: String, settle: Duration) -> Self {
        Self { export_dir, prefix, settle }
    }

    #[must_use]
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    #[must_use]
    pub fn final_path(&self, identity: &SnapshotIdentity) -> PathBuf {
        self.export_dir.join(identity.dir_name(&self.prefix))
    }

    /// Name prefix shared by every in-progress attempt for `identity`.
    #[must_use]
    pub fn temp_dir_prefix(&self, identity: &SnapshotIdentity) -> String {
        format!("{}.tmp-", identity.dir_name(&self.prefix))
    }

    fn attempt_path(&self, identity: &SnapshotIdentity) -> PathBuf {
        self.export_dir.join(format!("{}{}", self.temp_dir_prefix(identity), Uuid::new_v4()))
    }

    /// Publish a snapshot for `request.identity` unless one already exists.
    pub async fn export_if_absent<B: TrainingBackend + ?Sized>(
        &self,
        backend: &B,
        request: ExportRequest<'_>,
    ) -> TrainingResult<ExportOutcome> {
        let final_path = self.final_path(&request.identity);
        if final_path.exists() {
            info!(path = %final_path.display(), "NOT saving model, already exists");
            return Ok(ExportOutcome::AlreadyPublished(final_path));
        }

        info!(path = %final_path.display(), "SAVING MODEL");
        std::fs::create_dir_all(&self.export_dir).map_err(|e| TrainingError::io_at(&self.export_dir, e))?;
        let tmp_path = self.attempt_path(&request.identity);
        std::fs::create_dir(&tmp_path).map_err(|e| TrainingError::io_at(&tmp_path, e))?;
        debug!(path = %tmp_path.display(), "Assembling snapshot");

        if let Err(e) = self.assemble(backend, &request, &tmp_path).await {
            discard_attempt(&tmp_path);
            return Err(e);
        }

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        // Another exporter may have published while this one was assembling.
        if final_path.exists() {
            discard_attempt(&tmp_path);
            info!(path = %final_path.display(), "NOT saving model, published concurrently");
            return Ok(ExportOutcome::AlreadyPublished(final_path));
        }

        match std::fs::rename(&tmp_path, &final_path) {
            Ok(()) => {
                info!(path = %final_path.display(), "Published snapshot");
                Ok(ExportOutcome::Published(final_path))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::DirectoryNotEmpty
                ) =>
            {
                discard_attempt(&tmp_path);
                info!(path = %final_path.display(), "NOT saving model, published concurrently");
                Ok(ExportOutcome::AlreadyPublished(final_path))
            }
            Err(e) => {
                discard_attempt(&tmp_path);
                Err(TrainingError::io_at(&final_path, e))
            }
        }
    }

    async fn assemble<B: TrainingBackend + ?Sized>(
        &self,
        backend: &B,
        request: &ExportRequest<'_>,
        tmp_path: &Path,
    ) -> TrainingResult<()> {
        let snapshot_dir = tmp_path.join(SNAPSHOT_DIR);
        backend.export_snapshot(&snapshot_dir).await?;
        let mut metadata_dirs = vec![tmp_path.to_path_buf(), snapshot_dir];

        if let Some(averaged) = &request.averaged {
            let averaged_dir = tmp_path.join(AVERAGED_SNAPSHOT_DIR);
            backend.save_parameters(averaged, &averaged_dir).await?;
            metadata_dirs.push(averaged_dir);
        }

        for dir in &metadata_dirs {
            if !dir.is_dir() {
                return Err(TrainingError::Export(format!(
                    "backend did not create snapshot directory {}",
                    dir.display()
                )));
            }
            write_json_synced(&dir.join(MODEL_CONFIG_FILE), request.model_config)?;
            write_json_synced(&dir.join(HISTORY_FILE), request.history)?;
        }

        let manifest = ExportManifest {
            name: request.identity.dir_name(&self.prefix),
            identity: request.identity,
            created_at: Utc::now(),
            backend: backend.id().to_string(),
            averaged: request.averaged.is_some(),
            artifacts: collect_artifacts(tmp_path, SNAPSHOT_DIR, AVERAGED_SNAPSHOT_DIR)?,
        };
        write_json_synced(&tmp_path.join(EXPORT_MANIFEST_FILE), &manifest)?;
        Ok(())
    }
}

/// Remove this attempt's temp directory; the error being reported matters more.
fn discard_attempt(tmp_path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(tmp_path) {
        warn!(path = %tmp_path.display(), error = %e, "Failed to remove partial export");
    }
}
