//! Advisory per-package lock.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::{Error, Result};

/// Exclusive lock on `<locks_dir>/<name>.lock`, held until dropped.
#[derive(Debug)]
pub struct PackageLock {
    file: File,
    path: PathBuf,
}

impl PackageLock {
    /// Take the lock without waiting. A held lock fails with `Busy`.
    pub fn acquire(locks_dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(locks_dir).map_err(|e| Error::io(locks_dir, e))?;
        let path = locks_dir.join(format!("{name}.lock"));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| Error::Busy(name.to_string()))?;
        tracing::debug!(?path, "package lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = ?self.path, error = %e, "failed to release package lock");
        }
    }
}
