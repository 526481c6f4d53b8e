//! Install plans
//!
//! A plan mirrors every entry of a source tree onto a destination tree. It
//! is built completely before anything is touched so all conflicts are
//! known up front.

use std::path::{Path, PathBuf};

use addon_fs::{EntryKind, NormalizedPath, walk_tree};

use crate::{Error, Result};

/// What to do when a destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Refuse the whole merge
    Strict,
    /// Replace the existing file
    Force,
}

/// One source entry and where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub relative: NormalizedPath,
    pub kind: EntryKind,
    pub conflict_policy: ConflictPolicy,
}

/// Ordered list of entries, parents before children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    entries: Vec<PlannedEntry>,
}

impl InstallPlan {
    /// Plan the mirror of `source` onto `dest`.
    ///
    /// Top-level entries named in `exclude` are skipped along with their
    /// subtrees. An empty plan fails with [`Error::EmptySource`].
    pub fn build(
        source: &Path,
        dest: &Path,
        policy: ConflictPolicy,
        exclude: &[String],
    ) -> Result<Self> {
        if !source.is_dir() {
            return Err(Error::EmptySource(source.to_path_buf()));
        }

        let entries: Vec<PlannedEntry> = walk_tree(source)?
            .into_iter()
            .filter(|entry| {
                entry
                    .relative
                    .first_component()
                    .is_none_or(|top| !exclude.iter().any(|e| e == top))
            })
            .map(|entry| PlannedEntry {
                destination: dest.join(entry.relative.as_str()),
                source: entry.path,
                relative: entry.relative,
                kind: entry.kind,
                conflict_policy: policy,
            })
            .collect();

        if entries.is_empty() {
            return Err(Error::EmptySource(source.to_path_buf()));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PlannedEntry] {
        &self.entries
    }

    pub fn files(&self) -> impl Iterator<Item = &PlannedEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::File)
    }

    pub fn directories(&self) -> impl Iterator<Item = &PlannedEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::Directory)
    }

    /// Destinations of file entries that already exist.
    pub fn existing_files(&self) -> Vec<PathBuf> {
        self.files()
            .filter(|e| e.destination.exists())
            .map(|e| e.destination.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn plan_mirrors_tree_and_honours_exclusions() {
        let src = tempdir().unwrap();
        fs::create_dir_all(src.path().join("static/css")).unwrap();
        fs::create_dir_all(src.path().join("html")).unwrap();
        fs::write(src.path().join("static/css/a.css"), "").unwrap();
        fs::write(src.path().join("html/index.html"), "").unwrap();
        fs::write(src.path().join("info.ini"), "").unwrap();

        let plan = InstallPlan::build(
            src.path(),
            Path::new("/dest"),
            ConflictPolicy::Strict,
            &["static".to_string()],
        )
        .unwrap();

        let relative: Vec<_> = plan.entries().iter().map(|e| e.relative.as_str()).collect();
        assert_eq!(relative, vec!["html", "html/index.html", "info.ini"]);
        assert_eq!(plan.files().count(), 2);
        assert_eq!(
            plan.entries()[1].destination,
            Path::new("/dest").join("html/index.html")
        );
    }

    #[test]
    fn empty_or_missing_source_is_rejected() {
        let src = tempdir().unwrap();
        assert!(matches!(
            InstallPlan::build(src.path(), Path::new("/d"), ConflictPolicy::Force, &[]),
            Err(Error::EmptySource(_))
        ));
        assert!(matches!(
            InstallPlan::build(&src.path().join("nope"), Path::new("/d"), ConflictPolicy::Force, &[]),
            Err(Error::EmptySource(_))
        ));
    }
}
