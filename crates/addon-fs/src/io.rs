//! Atomic I/O operations, writability probes and removal helpers

use crate::{Error, NormalizedPath, Result};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Write content atomically to a file with locking.
///
/// Writes to a temp file in the same directory, then renames it over the
/// destination so readers never observe a partial write.
pub fn write_atomic(path: &NormalizedPath, content: &[u8]) -> Result<()> {
    let native_path = path.to_native();

    if let Some(parent) = native_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_name = format!(
        ".{}.{}.tmp",
        native_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id()
    );
    let temp_path = native_path.with_file_name(&temp_name);

    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io(&temp_path, e))?;

    temp_file
        .lock_exclusive()
        .map_err(|_| Error::LockFailed {
            path: native_path.clone(),
        })?;

    temp_file
        .write_all(content)
        .map_err(|e| Error::io(&temp_path, e))?;
    temp_file.sync_all().map_err(|e| Error::io(&temp_path, e))?;

    FileExt::unlock(&temp_file).map_err(|_| Error::LockFailed {
        path: native_path.clone(),
    })?;

    fs::rename(&temp_path, &native_path).map_err(|e| Error::io(&native_path, e))?;

    Ok(())
}

/// Read text content from a file.
pub fn read_text(path: &NormalizedPath) -> Result<String> {
    let native_path = path.to_native();
    fs::read_to_string(&native_path).map_err(|e| Error::io(&native_path, e))
}

/// Write text content to a file atomically.
pub fn write_text(path: &NormalizedPath, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes())
}

/// Whether the current process can write to an existing path.
///
/// Files are opened for writing without truncation. Directories are probed
/// by creating and removing a marker file. Missing paths are not writable.
pub fn is_writable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };

    if meta.is_dir() {
        let probe = path.join(format!(".addon-probe-{}", std::process::id()));
        match OpenOptions::new().write(true).create_new(true).open(&probe) {
            Ok(_) => {
                let _ = fs::remove_file(&probe);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => true,
            Err(_) => false,
        }
    } else {
        OpenOptions::new().write(true).open(path).is_ok()
    }
}

/// Whether a path could be created: the nearest existing ancestor is a
/// writable directory.
pub fn is_creatable(path: &Path) -> bool {
    let mut current = Some(path);
    while let Some(candidate) = current {
        if candidate.exists() {
            return candidate.is_dir() && is_writable(candidate);
        }
        current = candidate.parent();
    }
    false
}

/// Remove a file, treating a missing file as success.
///
/// Returns `true` when something was deleted.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove a directory tree, treating a missing directory as success.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Whether a directory has no entries. A missing directory counts as empty.
pub fn is_dir_empty(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Move a file, falling back to copy-then-delete when rename fails
/// (for example across filesystems).
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    tracing::debug!(?src, ?dst, "rename failed, copying instead");
    fs::copy(src, dst).map_err(|e| Error::io(dst, e))?;
    fs::remove_file(src).map_err(|e| Error::io(src, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creatable_walks_up_to_existing_ancestor() {
        let dir = tempdir().unwrap();
        assert!(is_creatable(&dir.path().join("a/b/c.txt")));
    }

    #[test]
    fn missing_path_is_not_writable() {
        let dir = tempdir().unwrap();
        assert!(!is_writable(&dir.path().join("nope")));
        assert!(is_writable(dir.path()));
    }

    #[test]
    fn probe_leaves_directory_empty() {
        let dir = tempdir().unwrap();
        assert!(is_writable(dir.path()));
        assert!(is_dir_empty(dir.path()).unwrap());
    }
}
