//! Deterministic cleanup of temporary compiled artifacts
//!
//! A temporary artifact stays on disk while any `Arc<TempArtifact>` is
//! alive. Loaded units built from the artifact hold one, so the file is
//! deleted exactly when the last handle to the unit is dropped, or
//! earlier through an explicit `release()`.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::staging::remove_if_exists;

/// Owns a temporary file and deletes it on drop
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    released: AtomicBool,
}

impl TempArtifact {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now. Later calls and the eventual drop are no-ops.
    ///
    /// Returns whether this call removed the file.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        match remove_if_exists(&self.path) {
            Ok(removed) => {
                tracing::debug!(path = %self.path.display(), removed, "temporary artifact released");
                removed
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to delete temporary artifact");
                false
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.release();
    }
}

/// Tracks live temporary artifacts by file name
#[derive(Debug, Default)]
pub struct TempArtifactReaper {
    tracked: Mutex<Vec<(String, Weak<TempArtifact>)>>,
}

impl TempArtifactReaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a temporary artifact
    pub fn track(&self, path: PathBuf) -> Arc<TempArtifact> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let artifact = Arc::new(TempArtifact::new(path));

        let mut tracked = self.tracked.lock();
        tracked.retain(|(_, weak)| weak.strong_count() > 0);
        tracked.push((name, Arc::downgrade(&artifact)));
        tracing::debug!(live = tracked.len(), "temporary artifact tracked");

        artifact
    }

    /// Drop bookkeeping for artifacts that were already deleted
    pub fn sweep(&self) -> usize {
        let mut tracked = self.tracked.lock();
        let before = tracked.len();
        tracked.retain(|(_, weak)| weak.strong_count() > 0);
        before - tracked.len()
    }

    /// Number of temporary artifacts still referenced
    pub fn live_count(&self) -> usize {
        self.tracked
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    /// File names of temporary artifacts still referenced
    pub fn live_names(&self) -> Vec<String> {
        self.tracked
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
