use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "train.json";
pub const TRAIN_SUBDIR: &str = "train";
pub const VAL_SUBDIR: &str = "val";

/// Half-open range of dataset rows covered by a manifest, serialized as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, u64)", into = "(u64, u64)")]
pub struct RowRange {
    pub start: u64,
    pub end: u64,
}

impl From<(u64, u64)> for RowRange {
    fn from((start, end): (u64, u64)) -> Self {
        Self { start, end }
    }
}

impl From<RowRange> for (u64, u64) {
    fn from(range: RowRange) -> Self {
        (range.start, range.end)
    }
}

/// Contents of `train.json` at the dataset root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub files: Vec<String>,
    pub range: RowRange,
}

impl DatasetManifest {
    /// Row watermark: how far into the dataset this manifest reaches.
    #[must_use]
    pub fn row_watermark(&self) -> u64 {
        self.range.end
    }
}

/// A record file together with the batch count declared by its sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFileInfo {
    pub path: PathBuf,
    pub declared_batches: i64,
}

#[derive(Debug, Deserialize)]
struct SidecarDescriptor {
    num_batches: i64,
}

pub fn load_manifest(path: &Path) -> TrainingResult<DatasetManifest> {
    let bytes = std::fs::read(path).map_err(|e| TrainingError::io_at(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| TrainingError::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Sidecar path for a record file: `X.<ext>` -> `X.json`.
#[must_use]
pub fn sidecar_path(record: &Path) -> PathBuf {
    record.with_extension("json")
}

pub fn load_record_info(record: &Path) -> TrainingResult<RecordFileInfo> {
    let sidecar = sidecar_path(record);
    let bytes = std::fs::read(&sidecar).map_err(|e| TrainingError::Sidecar {
        path: sidecar.clone(),
        reason: e.to_string(),
    })?;
    let descriptor: SidecarDescriptor = serde_json::from_slice(&bytes).map_err(|e| TrainingError::Sidecar {
        path: sidecar.clone(),
        reason: e.to_string(),
    })?;
    Ok(RecordFileInfo { path: record.to_path_buf(), declared_batches: descriptor.num_batches })
}

/// List record files directly inside `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn list_record_files(dir: &Path, extension: &str) -> TrainingResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| TrainingError::Other(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// List and describe every record file in `dir`.
pub fn load_record_infos(dir: &Path, extension: &str) -> TrainingResult<Vec<RecordFileInfo>> {
    list_record_files(dir, extension)?
        .iter()
        .map(|path| load_record_info(path))
        .collect()
}
