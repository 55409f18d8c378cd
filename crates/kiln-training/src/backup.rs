use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    NotDue,
    NoCheckpoint,
    Copied { copied: Vec<PathBuf>, failed: usize },
}

/// Copies the latest checkpoint into a long-term archive on a wall-clock cadence.
#[derive(Debug, Clone)]
pub struct BackupScheduler {
    archive_dir: PathBuf,
    interval: Duration,
    last_backup: DateTime<Utc>,
}

impl BackupScheduler {
    /// The first backup becomes due one `interval` after `started_at`.
    #[must_use]
    pub fn new(archive_dir: PathBuf, interval: Duration, started_at: DateTime<Utc>) -> Self {
        Self { archive_dir, interval, last_backup: started_at }
    }

    #[must_use]
    pub fn last_backup(&self) -> DateTime<Utc> {
        self.last_backup
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now - self.last_backup >= self.interval
    }

    /// Copy every part of `checkpoint` (files matching `"{prefix}*"`) if a backup is due.
    ///
    /// Copy failures are logged and counted; they never abort the run.
    pub fn maybe_backup(&mut self, now: DateTime<Utc>, checkpoint: Option<&Path>) -> BackupOutcome {
        if !self.is_due(now) {
            return BackupOutcome::NotDue;
        }
        self.last_backup = now;

        let Some(prefix) = checkpoint else {
            warn!("No checkpoint available yet, skipping long-term backup");
            return BackupOutcome::NoCheckpoint;
        };

        let pattern = format!("{}*", glob::Pattern::escape(&prefix.to_string_lossy()));
        let parts = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalid checkpoint pattern, skipping long-term backup");
                return BackupOutcome::Copied { copied: Vec::new(), failed: 1 };
            }
        };

        let mut copied = Vec::new();
        let mut failed = 0;
        for part in parts {
            let part = match part {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Failed to read checkpoint part");
                    failed += 1;
                    continue;
                }
            };
            if !part.is_file() {
                continue;
            }
            let Some(file_name) = part.file_name() else {
                continue;
            };
            let dest = self.archive_dir.join(file_name);
            info!(path = %part.display(), "Copying checkpoint longterm");
            match std::fs::copy(&part, &dest) {
                Ok(_) => copied.push(dest),
                Err(e) => {
                    warn!(path = %part.display(), error = %e, "Failed to copy checkpoint part");
                    failed += 1;
                }
            }
        }

        BackupOutcome::Copied { copied, failed }
    }
}
