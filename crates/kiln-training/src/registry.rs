use crate::error::{TrainingError, TrainingResult};
use crate::export::{SnapshotIdentity, AVERAGED_SNAPSHOT_DIR};
use std::path::{Path, PathBuf};

/// A snapshot found in an export directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSnapshot {
    pub name: String,
    pub path: PathBuf,
    pub identity: SnapshotIdentity,
    pub has_averaged: bool,
}

/// Discover published snapshots named `<prefix>-s<samples>-d<rows>` in `export_dir`.
///
/// In-progress `.tmp-*` directories and foreign names are ignored. Results are
/// ordered by sample count, then row watermark.
pub fn discover_snapshots(export_dir: &Path, prefix: &str) -> TrainingResult<Vec<PublishedSnapshot>> {
    let mut out = Vec::new();

    let dir = match std::fs::read_dir(export_dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(TrainingError::io_at(export_dir, e)),
    };

    for entry in dir {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let Some(identity) = SnapshotIdentity::parse(prefix, &name) else {
            continue;
        };

        out.push(PublishedSnapshot {
            has_averaged: path.join(AVERAGED_SNAPSHOT_DIR).is_dir(),
            name,
            path,
            identity,
        });
    }

    out.sort_by_key(|s| (s.identity.total_samples, s.identity.row_watermark));
    Ok(out)
}

/// Most recently trained published snapshot, if any.
pub fn latest_snapshot(export_dir: &Path, prefix: &str) -> TrainingResult<Option<PublishedSnapshot>> {
    Ok(discover_snapshots(export_dir, prefix)?.pop())
}
