// src/scheduler/lock.rs

//! Cross-process lock around build passes
//!
//! Callbacks from local jobs arrive through separate CLI processes, so the
//! in-process gate alone does not keep two passes apart. The lock is an
//! `flock(LOCK_EX)` on a file in the temp directory, held for one pass and
//! released on drop.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct PassLock {
    file: File,
    path: PathBuf,
}

impl PassLock {
    /// Acquire the lock, blocking until it is available
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        file.lock_exclusive().map_err(|e| {
            Error::IoError(format!("Failed to acquire pass lock {}: {e}", path.display()))
        })?;

        debug!("Acquired pass lock at {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Check whether any process holds the lock
    pub fn is_held(path: &Path) -> bool {
        let Ok(file) = File::open(path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(_) => true,
        }
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release pass lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("temp/scheduler.lock");

        let lock = PassLock::acquire(&path).unwrap();
        assert!(PassLock::is_held(&path));
        drop(lock);
        assert!(!PassLock::is_held(&path));
    }
}
