//! Tree Merger
//!
//! Moves or copies a source tree onto a destination tree, creating missing
//! directories and recording every path it creates or overwrites in a
//! [`MergeRecord`]. The record is filled incrementally, so a caller holding
//! it after a failed merge knows exactly what to roll back.

mod plan;

pub use plan::{ConflictPolicy, InstallPlan, PlannedEntry};

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// How files travel from source to destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Rename, falling back to copy-then-delete; the source is consumed
    Move,
    /// Copy, leaving the source intact
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub conflict: ConflictPolicy,
    pub transfer: Transfer,
}

impl MergePolicy {
    pub const fn new(conflict: ConflictPolicy, transfer: Transfer) -> Self {
        Self { conflict, transfer }
    }

    pub const fn strict(transfer: Transfer) -> Self {
        Self::new(ConflictPolicy::Strict, transfer)
    }

    pub const fn force(transfer: Transfer) -> Self {
        Self::new(ConflictPolicy::Force, transfer)
    }
}

/// A file placed at the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    pub path: PathBuf,
    /// `true` when a file already existed there and was replaced
    pub overwritten: bool,
}

/// Everything a merge created or overwrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeRecord {
    /// Created directories, in creation order
    pub directories: Vec<PathBuf>,
    pub files: Vec<PlacedFile>,
}

impl MergeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }

    /// Files that did not exist before the merge.
    pub fn created_files(&self) -> impl Iterator<Item = &Path> {
        self.files
            .iter()
            .filter(|f| !f.overwritten)
            .map(|f| f.path.as_path())
    }

    pub fn overwritten_files(&self) -> impl Iterator<Item = &Path> {
        self.files
            .iter()
            .filter(|f| f.overwritten)
            .map(|f| f.path.as_path())
    }

    /// Append another record, keeping order.
    pub fn extend(&mut self, other: MergeRecord) {
        self.directories.extend(other.directories);
        self.files.extend(other.files);
    }

    /// Best-effort undo: delete created files, then created directories
    /// child-first.
    ///
    /// Overwritten files are left in place; their previous content is gone.
    /// Failures are logged and skipped. Returns the number of paths removed.
    pub fn rollback(&self) -> usize {
        let mut removed = 0;
        for file in self.created_files() {
            match addon_fs::io::remove_file_if_exists(file) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(?file, error = %e, "rollback could not remove file"),
            }
        }
        for dir in self.directories.iter().rev() {
            match addon_fs::io::remove_dir_all_if_exists(dir) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(?dir, error = %e, "rollback could not remove directory"),
            }
        }
        tracing::debug!(removed, "rollback finished");
        removed
    }
}

/// Configured merge of one tree onto another.
#[derive(Debug, Clone)]
pub struct TreeMerger {
    policy: MergePolicy,
    exclude: Vec<String>,
}

impl TreeMerger {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            exclude: Vec::new(),
        }
    }

    /// Skip a top-level entry of the source (and everything below it).
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    pub fn plan(&self, source: &Path, dest: &Path) -> Result<InstallPlan> {
        InstallPlan::build(source, dest, self.policy.conflict, &self.exclude)
    }

    pub fn merge(&self, source: &Path, dest: &Path) -> Result<MergeRecord> {
        let mut record = MergeRecord::new();
        self.merge_into(source, dest, &mut record)?;
        Ok(record)
    }

    /// Merge, appending to `record` as each path is touched.
    ///
    /// On error `record` holds everything placed so far.
    pub fn merge_into(&self, source: &Path, dest: &Path, record: &mut MergeRecord) -> Result<()> {
        let plan = self.plan(source, dest)?;

        if self.policy.conflict == ConflictPolicy::Strict {
            let existing = plan.existing_files();
            if !existing.is_empty() {
                return Err(Error::DestinationExists(existing));
            }
        }

        create_dir_recorded(dest, record)?;

        for entry in plan.entries() {
            match entry.kind {
                addon_fs::EntryKind::Directory => create_dir_recorded(&entry.destination, record)?,
                addon_fs::EntryKind::File => self.place_file(entry, record)?,
            }
        }

        if self.policy.transfer == Transfer::Move {
            prune_source(source, &plan);
        }

        tracing::debug!(
            ?source,
            ?dest,
            files = plan.files().count(),
            "merged tree"
        );
        Ok(())
    }

    fn place_file(&self, entry: &PlannedEntry, record: &mut MergeRecord) -> Result<()> {
        let overwritten = entry.destination.exists();
        if overwritten {
            fs::remove_file(&entry.destination).map_err(|source| Error::DestinationNotWritable {
                path: entry.destination.clone(),
                source,
            })?;
        }

        let placed = match self.policy.transfer {
            Transfer::Move => addon_fs::io::move_file(&entry.source, &entry.destination),
            Transfer::Copy => fs::copy(&entry.source, &entry.destination)
                .map(|_| ())
                .map_err(|e| addon_fs::Error::io(&entry.destination, e)),
        };
        placed.map_err(|e| Error::MergeWriteFailed {
            from: entry.source.clone(),
            to: entry.destination.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(path = ?entry.destination, overwritten, "placed file");
        record.files.push(PlacedFile {
            path: entry.destination.clone(),
            overwritten,
        });
        Ok(())
    }
}

/// Merge with default settings.
pub fn merge(source: &Path, dest: &Path, policy: MergePolicy) -> Result<MergeRecord> {
    TreeMerger::new(policy).merge(source, dest)
}

/// Merge appending to an existing record.
pub fn merge_into(
    source: &Path,
    dest: &Path,
    policy: MergePolicy,
    record: &mut MergeRecord,
) -> Result<()> {
    TreeMerger::new(policy).merge_into(source, dest, record)
}

/// Create `dir` and any missing ancestors, recording each one created.
pub(crate) fn create_dir_recorded(dir: &Path, record: &mut MergeRecord) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path.exists() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }

    for path in missing.into_iter().rev() {
        fs::create_dir(&path).map_err(|source| Error::DirectoryCreateFailed {
            path: path.clone(),
            source,
        })?;
        record.directories.push(path);
    }
    Ok(())
}

/// Remove the directories a move emptied, child-first, then the source root.
/// Non-empty directories (excluded subtrees) are kept.
fn prune_source(source: &Path, plan: &InstallPlan) {
    let dirs: Vec<&Path> = plan.directories().map(|e| e.source.as_path()).collect();
    for dir in dirs.into_iter().rev().chain(std::iter::once(source)) {
        if matches!(addon_fs::io::is_dir_empty(dir), Ok(true)) {
            if let Err(e) = fs::remove_dir(dir) {
                tracing::warn!(?dir, error = %e, "could not remove emptied source directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn tree(root: &Path, files: &[(&str, &str)]) {
        for (rel, body) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
    }

    #[test]
    fn move_records_every_created_path_and_consumes_source() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        let dest = tmp.path().join("addons/demo");
        tree(&src, &[("info.ini", "a"), ("lib/x.php", "b")]);

        let record = merge(&src, &dest, MergePolicy::strict(Transfer::Move)).unwrap();

        assert_eq!(
            record.directories,
            vec![tmp.path().join("addons"), dest.clone(), dest.join("lib")]
        );
        let files: Vec<_> = record.created_files().collect();
        assert_eq!(files, vec![dest.join("info.ini").as_path(), dest.join("lib/x.php").as_path()]);
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dest.join("lib/x.php")).unwrap(), "b");
    }

    #[test]
    fn strict_refuses_before_touching_anything() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        tree(&src, &[("a.txt", "new"), ("sub/b.txt", "new")]);
        tree(&dest, &[("a.txt", "old")]);

        let err = merge(&src, &dest, MergePolicy::strict(Transfer::Move)).unwrap_err();

        assert!(matches!(err, Error::DestinationExists(ref p) if p == &vec![dest.join("a.txt")]));
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "old");
        assert!(!dest.join("sub").exists());
        assert!(src.join("a.txt").exists());
    }

    #[test]
    fn force_overwrites_and_flags_it() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        tree(&src, &[("a.txt", "new"), ("b.txt", "new")]);
        tree(&dest, &[("a.txt", "old")]);

        let record = merge(&src, &dest, MergePolicy::force(Transfer::Copy)).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "new");
        assert_eq!(record.overwritten_files().collect::<Vec<_>>(), vec![dest.join("a.txt").as_path()]);
        assert_eq!(record.created_files().collect::<Vec<_>>(), vec![dest.join("b.txt").as_path()]);
        assert!(src.join("a.txt").exists());
    }

    #[test]
    fn empty_source_leaves_destination_untouched() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let dest = tmp.path().join("dest");

        let err = merge(&src, &dest, MergePolicy::strict(Transfer::Move)).unwrap_err();

        assert!(matches!(err, Error::EmptySource(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn rollback_removes_created_paths_only() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        tree(&src, &[("keep.txt", "new"), ("fresh/n.txt", "new")]);
        tree(&dest, &[("keep.txt", "old"), ("other.txt", "x")]);

        let record = merge(&src, &dest, MergePolicy::force(Transfer::Copy)).unwrap();
        record.rollback();

        assert!(dest.join("keep.txt").exists());
        assert!(dest.join("other.txt").exists());
        assert!(!dest.join("fresh").exists());
    }

    #[test]
    fn excluded_subtree_survives_move() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        tree(&src, &[("index.html", "t"), ("static/app.css", "s")]);

        TreeMerger::new(MergePolicy::strict(Transfer::Move))
            .exclude("static")
            .merge(&src, &dest)
            .unwrap();

        assert!(dest.join("index.html").exists());
        assert!(!dest.join("static").exists());
        assert!(src.join("static/app.css").exists());
    }
}
