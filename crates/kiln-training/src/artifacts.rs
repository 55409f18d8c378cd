use crate::error::{TrainingError, TrainingResult};
use crate::export::SnapshotIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const EXPORT_MANIFEST_FILE: &str = "export_manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Snapshot,
    AveragedSnapshot,
    Config,
    History,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub kind: ArtifactKind,
    /// Path relative to the snapshot directory.
    pub path: PathBuf,
    pub sha256: String,
}

/// Checksummed listing of a published snapshot, written last before publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub name: String,
    pub identity: SnapshotIdentity,
    pub created_at: DateTime<Utc>,
    pub backend: String,
    pub averaged: bool,
    pub artifacts: Vec<ExportArtifact>,
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path).map_err(|e| TrainingError::io_at(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn classify(relative: &Path, averaged_dir: &str, snapshot_dir: &str) -> ArtifactKind {
    let file_name = relative.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    match file_name {
        crate::layout::MODEL_CONFIG_FILE => return ArtifactKind::Config,
        crate::layout::HISTORY_FILE => return ArtifactKind::History,
        _ => {}
    }
    match relative.components().next().and_then(|c| c.as_os_str().to_str()) {
        Some(dir) if dir == averaged_dir => ArtifactKind::AveragedSnapshot,
        Some(dir) if dir == snapshot_dir => ArtifactKind::Snapshot,
        _ => ArtifactKind::Other,
    }
}

/// Hash every file under `root`, sorted by relative path.
pub fn collect_artifacts(root: &Path, snapshot_dir: &str, averaged_dir: &str) -> TrainingResult<Vec<ExportArtifact>> {
    let mut artifacts = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| TrainingError::Other(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| TrainingError::Export(e.to_string()))?
            .to_path_buf();
        if relative == Path::new(EXPORT_MANIFEST_FILE) {
            continue;
        }
        artifacts.push(ExportArtifact {
            kind: classify(&relative, averaged_dir, snapshot_dir),
            sha256: sha256_file(entry.path())?,
            path: relative,
        });
    }
    Ok(artifacts)
}
