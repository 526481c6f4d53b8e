//! Recursive tree enumeration

use crate::{Error, NormalizedPath, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of an enumerated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry below a walked root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the walked root, forward-slash separated
    pub relative: NormalizedPath,
    pub kind: EntryKind,
}

/// Enumerate every entry under `root`, parents before children.
///
/// The root itself is not included. Entries are sorted by name within a
/// directory so the order is stable across platforms. Symlinks are not
/// followed and are reported as files.
pub fn walk_tree(root: &Path) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Walk {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map(NormalizedPath::new)
            .map_err(|e| Error::Walk {
                path: entry.path().to_path_buf(),
                message: e.to_string(),
            })?;
        let kind = if entry.file_type().is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push(TreeEntry {
            path: entry.path().to_path_buf(),
            relative,
            kind,
        });
    }
    Ok(entries)
}

/// Names of the immediate subdirectories of `dir`, sorted.
///
/// Names containing a `.` are skipped. A missing directory yields nothing.
pub fn child_dir_names(dir: &Path) -> Result<Vec<String>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };

    let mut names = Vec::new();
    for entry in read {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_dir && !name.contains('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
