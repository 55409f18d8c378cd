//! Append-only training history.
//!
//! The journal is the single source of truth for how much data a run has
//! consumed. It is persisted with [`write_json_atomic`], so the canonical file
//! is always either the previous version or the new one, never a torn write.

use crate::atomic::write_json_atomic;
use crate::dataset::{DatasetManifest, RowRange};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::RunLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    Initialized { config: serde_json::Value },
    NewData { range: RowRange },
    SamplesProcessed { count: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainHistory {
    /// File list of the most recently loaded manifest.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl TrainHistory {
    /// Cumulative samples recorded by the last `SamplesProcessed` event.
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.history
            .iter()
            .rev()
            .find_map(|entry| match entry.event {
                HistoryEvent::SamplesProcessed { count } => Some(count),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Row range of the last `NewData` event.
    #[must_use]
    pub fn latest_range(&self) -> Option<RowRange> {
        self.history.iter().rev().find_map(|entry| match entry.event {
            HistoryEvent::NewData { range } => Some(range),
            _ => None,
        })
    }
}

/// Where a journal's initial contents came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistorySource {
    Existing(PathBuf),
    Inherited(PathBuf),
    Fresh,
}

#[derive(Debug)]
pub struct HistoryJournal {
    path: PathBuf,
    tmp_path: PathBuf,
    history: TrainHistory,
}

/// Read a history file without taking ownership of it.
pub fn read_history(path: &Path) -> TrainingResult<TrainHistory> {
    let bytes = std::fs::read(path).map_err(|e| TrainingError::io_at(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TrainingError::Journal(format!("failed to parse {}: {e}", path.display())))
}

impl HistoryJournal {
    /// Load the run's history, falling back to the warm-start lineage, then to
    /// a fresh history seeded with `Initialized(model_config)`.
    pub fn load(layout: &RunLayout, model_config: &serde_json::Value) -> TrainingResult<(Self, HistorySource)> {
        let path = layout.history_path();
        let inherited = layout.inherited_history_path();

        let (history, source) = if path.is_file() {
            info!(path = %path.display(), "Loading existing training history");
            (read_history(&path)?, HistorySource::Existing(path.clone()))
        } else if inherited.is_file() {
            info!(path = %inherited.display(), "Loading previous model's training history");
            (read_history(&inherited)?, HistorySource::Inherited(inherited))
        } else {
            let mut history = TrainHistory::default();
            history.history.push(HistoryEntry {
                recorded_at: Utc::now(),
                event: HistoryEvent::Initialized { config: model_config.clone() },
            });
            (history, HistorySource::Fresh)
        };

        Ok((Self { path, tmp_path: layout.history_tmp_path(), history }, source))
    }

    #[must_use]
    pub fn history(&self) -> &TrainHistory {
        &self.history
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, event: HistoryEvent) {
        self.history.history.push(HistoryEntry { recorded_at: Utc::now(), event });
    }

    /// Record a newly loaded dataset manifest.
    pub fn record_new_data(&mut self, manifest: &DatasetManifest) {
        self.history.files.clone_from(&manifest.files);
        self.append(HistoryEvent::NewData { range: manifest.range });
    }

    /// Post-checkpoint hook: record the cumulative sample count and persist.
    pub fn record_samples(&mut self, count: u64) -> TrainingResult<()> {
        self.append(HistoryEvent::SamplesProcessed { count });
        self.persist()
    }

    /// Atomically replace the canonical history file.
    pub fn persist(&self) -> TrainingResult<()> {
        write_json_atomic(&self.path, &self.tmp_path, &self.history)?;
        info!(path = %self.path.display(), "Wrote training history");
        Ok(())
    }

    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.history.total_samples()
    }
}
