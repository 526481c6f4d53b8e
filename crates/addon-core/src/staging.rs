//! Staging Area Manager
//!
//! Archives are extracted under `runtime/staging/<name>-<version>/<name>/`
//! before they are merged into the site, so the folder name always matches
//! the manifest name. A [`StagingHandle`] owns that directory and removes it
//! when released or dropped.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use addon_fs::NormalizedPath;
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::{Error, Result};

fn extraction(archive: &Path, message: impl ToString) -> Error {
    Error::Extraction {
        archive: archive.to_path_buf(),
        message: message.to_string(),
    }
}

/// Deterministic staging key for a package version.
pub fn staging_key(name: &str, version: &str) -> String {
    format!("{name}-{version}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Root directory holding all staged packages.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extract `archive` for package `name` at `version`.
    ///
    /// Any earlier staging directory with the same key is cleared first.
    /// On failure nothing is left behind.
    pub fn stage(&self, archive: &Path, name: &str, version: &str) -> Result<StagingHandle> {
        let key_dir = self.root.join(staging_key(name, version));
        addon_fs::io::remove_dir_all_if_exists(&key_dir)?;
        let package_dir = key_dir.join(name);
        fs::create_dir_all(&package_dir).map_err(|e| Error::io(&package_dir, e))?;

        let mut handle = StagingHandle {
            key_dir: Some(key_dir),
            path: package_dir,
            released: false,
        };
        match extract(archive, &handle.path) {
            Ok(files) => {
                tracing::debug!(?archive, path = ?handle.path, files, "staged archive");
                Ok(handle)
            }
            Err(e) => {
                handle.release();
                Err(e)
            }
        }
    }

    /// Wrap an already extracted package directory. The directory is never
    /// deleted by the handle.
    pub fn adopt(&self, dir: impl Into<PathBuf>) -> StagingHandle {
        StagingHandle {
            key_dir: None,
            path: dir.into(),
            released: false,
        }
    }
}

/// Staged package directory.
#[derive(Debug)]
pub struct StagingHandle {
    /// Directory removed on release, `None` for adopted sources
    key_dir: Option<PathBuf>,
    path: PathBuf,
    released: bool,
}

impl StagingHandle {
    /// Package root inside the staging area.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the handle deletes its directory on release.
    pub fn is_owned(&self) -> bool {
        self.key_dir.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Remove the staging directory. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(dir) = &self.key_dir {
            match addon_fs::io::remove_dir_all_if_exists(dir) {
                Ok(_) => tracing::debug!(?dir, "released staging directory"),
                Err(e) => tracing::warn!(?dir, error = %e, "failed to release staging directory"),
            }
        }
    }

    /// Keep the staged directory and hand its path to the caller.
    pub fn promote(mut self) -> PathBuf {
        self.released = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for StagingHandle {
    fn drop(&mut self) {
        if !self.released && self.is_owned() {
            tracing::warn!(path = ?self.path, "staging handle dropped without release");
            self.release();
        }
    }
}

/// Extract every entry of `archive` into `dest`. Returns the file count.
fn extract(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| Error::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| extraction(archive, e))?;

    let mut files = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| extraction(archive, e))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(extraction(
                archive,
                format!("unsafe entry name '{}'", entry.name()),
            ));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| Error::io(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| extraction(archive, e))?;
        files += 1;
    }
    Ok(files)
}

/// File entries of an archive, without extracting it.
pub fn list_archive(archive: &Path) -> Result<Vec<NormalizedPath>> {
    let file = File::open(archive).map_err(|e| Error::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| extraction(archive, e))?;

    let mut entries = Vec::new();
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|e| extraction(archive, e))?;
        if entry.is_dir() {
            continue;
        }
        match entry.enclosed_name() {
            Some(name) => entries.push(NormalizedPath::new(name)),
            None => tracing::warn!(entry = entry.name(), "skipping unsafe archive entry"),
        }
    }
    Ok(entries)
}

/// Write the tree under `dir` to a zip archive at `zip_path`.
///
/// Used to back up a package before an upgrade. Returns the number of files
/// written.
pub fn pack(dir: &Path, zip_path: &Path) -> Result<usize> {
    let entries = addon_fs::walk_tree(dir)?;
    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let zip_error = |e: zip::result::ZipError| Error::io(zip_path, io::Error::other(e));

    let file = File::create(zip_path).map_err(|e| Error::io(zip_path, e))?;
    let mut writer = ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut files = 0;
    for entry in &entries {
        let name = entry.relative.as_str();
        match entry.kind {
            addon_fs::EntryKind::Directory => {
                writer
                    .add_directory(format!("{name}/"), options)
                    .map_err(zip_error)?;
            }
            addon_fs::EntryKind::File => {
                writer.start_file(name, options).map_err(zip_error)?;
                let mut source = File::open(&entry.path).map_err(|e| Error::io(&entry.path, e))?;
                io::copy(&mut source, &mut writer).map_err(|e| Error::io(zip_path, e))?;
                files += 1;
            }
        }
    }
    writer.finish().map_err(zip_error)?;

    tracing::info!(?dir, archive = ?zip_path, files, "packed directory");
    Ok(files)
}
