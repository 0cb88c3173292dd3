//! Cleanup set for ephemeral files created during a run

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Paths a run has created (or is about to create) on ephemeral storage
///
/// Cloning yields another handle to the same set, so blocking stages can register the
/// files they write as they go. Paths are purged in reverse registration order, which
/// removes files before the directories that hold them.
#[derive(Clone, Debug, Default)]
pub struct CleanupSet {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl CleanupSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path for removal at the end of the run
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        if !paths.contains(&path) {
            debug!(?path, "registered for cleanup");
            paths.push(path);
        }
    }

    /// Record several paths at once
    pub fn register_all<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            self.register(path);
        }
    }

    /// Snapshot of the registered paths
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of registered paths
    pub fn len(&self) -> usize {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every registered path, best-effort
    ///
    /// Paths that no longer exist are skipped silently. Other failures are logged as
    /// warnings and never propagated. Returns the number of paths actually removed.
    pub async fn purge(&self, task: &str) -> usize {
        let paths: Vec<PathBuf> = std::mem::take(
            &mut *self.paths.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let mut removed = 0;
        for path in paths.iter().rev() {
            match remove_path(path).await {
                Ok(true) => {
                    debug!(task = %task, ?path, "removed ephemeral file");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(task = %task, ?path, error = %e, "failed to remove ephemeral file");
                }
            }
        }

        info!(task = %task, removed, registered = paths.len(), "cleanup complete");
        removed
    }
}

/// Remove a file or directory tree; `Ok(false)` when it was already gone
async fn remove_path(path: &Path) -> std::io::Result<bool> {
    use tokio::fs;

    let metadata = match fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
