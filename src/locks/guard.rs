//! RAII lock guard implementation.

use crate::error::{RepoError, Result};
use crate::fs::RetryPolicy;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// RAII guard for a fixed-lock file.
///
/// When dropped, the lock file is deleted. Deletion of an already-removed
/// file is a no-op, so releasing twice (or racing a reaper) is safe. If
/// deletion keeps failing, a warning is printed after a bounded retry and
/// the program continues; a failed unlock must never hang shutdown.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub(super) fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    /// Path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicitly release the lock, reporting failure to the caller.
    ///
    /// A lock file that is already gone counts as released: another process
    /// may have reaped it, and insisting on an error here would turn a
    /// harmless race into a shutdown failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RepoError::Lock(format!(
                "failed to release lock '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Transient unlink failures happen on NFS; retry briefly, then warn
        // and move on.
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let result = policy.run(|| match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        });
        if let Err(e) = result {
            eprintln!(
                "Warning: failed to release lock '{}': {}",
                self.path.display(),
                e
            );
        }
    }
}
