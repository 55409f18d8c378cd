//! Durable JSON writes.

use crate::error::{TrainingError, TrainingResult};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Serialize `value` to `path`, flush it and fsync before returning.
pub fn write_json_synced<T: Serialize + ?Sized>(path: &Path, value: &T) -> TrainingResult<()> {
    let file = File::create(path).map_err(|e| TrainingError::io_at(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(|e| TrainingError::io_at(path, e))?;
    let file = writer.into_inner().map_err(|e| TrainingError::io_at(path, e.into_error()))?;
    file.sync_all().map_err(|e| TrainingError::io_at(path, e))?;
    Ok(())
}

/// Replace `path` with the serialized `value` without ever exposing a partial file.
///
/// The value is written and synced at `tmp_path`, then renamed over `path`.
/// `tmp_path` must be on the same filesystem as `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, tmp_path: &Path, value: &T) -> TrainingResult<()> {
    if let Err(e) = write_json_synced(tmp_path, value) {
        let _ = std::fs::remove_file(tmp_path);
        return Err(e);
    }
    std::fs::rename(tmp_path, path).map_err(|e| TrainingError::io_at(path, e))?;
    Ok(())
}
