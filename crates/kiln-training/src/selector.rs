//! Sub-epoch file selection.
//!
//! Files are visited through a [`FileCursor`], which walks a shuffled copy of
//! the current file list and reshuffles whenever it runs out, so over many
//! sub-epochs every file gets roughly equal exposure.
//!
//! [`select_files`] then accumulates files until their declared batch counts
//! reach the sub-epoch target. When the next file would overshoot, it is kept
//! with probability `1 - overshoot / count`, which makes the expected selected
//! batch count equal to the target. The first file of a sub-epoch is always
//! kept, so a sub-epoch is never empty even if one file exceeds the target.

use crate::dataset::RecordFileInfo;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::PathBuf;
use tracing::debug;

/// Restartable cursor over an endlessly reshuffled file list.
#[derive(Debug, Clone, Default)]
pub struct FileCursor {
    files: Vec<RecordFileInfo>,
    index: usize,
}

impl FileCursor {
    #[must_use]
    pub fn new(files: Vec<RecordFileInfo>) -> Self {
        let index = files.len();
        Self { files, index }
    }

    /// Replace the file list. The next draw starts a fresh permutation.
    pub fn reset(&mut self, files: Vec<RecordFileInfo>) {
        *self = Self::new(files);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Next file of the current permutation, reshuffling on exhaustion.
    pub fn next_file<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<&RecordFileInfo> {
        if self.files.is_empty() {
            return None;
        }
        if self.index >= self.files.len() {
            self.files.shuffle(rng);
            self.index = 0;
        }
        let file = &self.files[self.index];
        self.index += 1;
        debug!(path = %file.path.display(), "Yielding training file for dataset");
        Some(file)
    }
}

/// Files chosen for one sub-epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub files: Vec<PathBuf>,
    pub batches: i64,
}

impl Selection {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Draw files from `cursor` until their batch counts reach `target_batches`.
///
/// Stops early once `max_files` files are selected, or when a full pass over
/// the cursor turns up no file with a positive batch count.
pub fn select_files<R: Rng + ?Sized>(
    cursor: &mut FileCursor,
    target_batches: f64,
    max_files: usize,
    rng: &mut R,
) -> Selection {
    let mut selection = Selection::default();
    let mut unusable_in_a_row = 0usize;

    loop {
        let pool = cursor.len();
        let Some(file) = cursor.next_file(rng) else {
            break;
        };

        let count = file.declared_batches;
        if count <= 0 {
            unusable_in_a_row += 1;
            if unusable_in_a_row >= pool {
                break;
            }
            continue;
        }
        unusable_in_a_row = 0;

        let total = selection.batches as f64;
        let count_f = count as f64;
        if total > 0.0 && total + count_f > target_batches {
            let overshoot = total + count_f - target_batches;
            let stop_chance = (overshoot / count_f).clamp(0.0, 1.0);
            if rng.gen_bool(stop_chance) {
                break;
            }
        }

        selection.files.push(file.path.clone());
        selection.batches += count;

        if selection.batches as f64 >= target_batches || selection.files.len() >= max_files {
            break;
        }
    }

    selection
}
