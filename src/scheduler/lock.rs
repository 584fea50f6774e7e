//! Run lock
//!
//! An exclusive advisory lock on a file keeps two batches from running at
//! the same time, whether they come from two timers or a timer and a manual
//! `run`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Held for the lifetime of one run; released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without waiting. Fails with [`Error::RunInProgress`]
    /// when another holder exists.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| Error::RunInProgress(path.display().to_string()))?;

        debug!("Acquired run lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("Released run lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_second_holder_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".seal-runner.lock");

        let first = assert_ok!(RunLock::try_acquire(&path));
        let refused = assert_err!(RunLock::try_acquire(&path));
        assert!(matches!(refused, Error::RunInProgress(_)));

        drop(first);
        assert_ok!(RunLock::try_acquire(&path));
    }
}
