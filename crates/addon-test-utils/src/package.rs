//! [`PackageBuilder`] for package fixtures.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::{SimpleFileOptions, ZipWriter};

/// Builds a package with an `info.ini` manifest and arbitrary files.
///
/// # Example
///
/// ```rust,no_run
/// use addon_test_utils::PackageBuilder;
///
/// let dir = tempfile::tempdir().unwrap();
/// let demo = PackageBuilder::addon("demo")
///     .file("Demo.php", "<?php")
///     .install_file("app/controller/Demo.php", "<?php");
/// let unpacked = demo.write_dir(dir.path());
/// let archive = demo.write_zip(&dir.path().join("demo.zip"));
/// ```
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    name: String,
    manifest: String,
    files: Vec<(String, Vec<u8>)>,
}

impl PackageBuilder {
    /// An addon with a complete manifest, version `1.0.0`.
    pub fn addon(name: &str) -> Self {
        Self::addon_version(name, "1.0.0")
    }

    pub fn addon_version(name: &str, version: &str) -> Self {
        let manifest = format!(
            "name = {name}\ntitle = {name} addon\ntype = addon\nauthor = tester\nversion = {version}\nstatus = 1\n"
        );
        Self::with_manifest(name, &manifest)
    }

    /// A template for `module` with a complete manifest.
    pub fn template(module: &str, name: &str) -> Self {
        let manifest = format!(
            "name = {name}\ntitle = {name} theme\ntype = template\nmodule = {module}\nauthor = tester\nversion = 1.0.0\n"
        );
        Self::with_manifest(name, &manifest)
    }

    /// A package whose manifest is exactly `manifest`.
    pub fn with_manifest(name: &str, manifest: &str) -> Self {
        Self {
            name: name.to_string(),
            manifest: manifest.to_string(),
            files: Vec::new(),
        }
    }

    /// Append lines to the manifest.
    pub fn manifest_line(mut self, line: &str) -> Self {
        self.manifest.push_str(line);
        self.manifest.push('\n');
        self
    }

    /// Drop the manifest entirely.
    pub fn without_manifest(mut self) -> Self {
        self.manifest.clear();
        self
    }

    /// Add a file relative to the package root.
    pub fn file(mut self, rel: &str, content: impl AsRef<[u8]>) -> Self {
        self.files.push((rel.to_string(), content.as_ref().to_vec()));
        self
    }

    /// Add a file below `install/`.
    pub fn install_file(self, rel: &str, content: impl AsRef<[u8]>) -> Self {
        self.file(&format!("install/{rel}"), content)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn entries(&self) -> Vec<(String, Vec<u8>)> {
        let mut entries = Vec::new();
        if !self.manifest.is_empty() {
            entries.push(("info.ini".to_string(), self.manifest.clone().into_bytes()));
        }
        entries.extend(self.files.iter().cloned());
        entries
    }

    /// Write the package to `<parent>/<name>/` and return that directory.
    pub fn write_dir(&self, parent: &Path) -> PathBuf {
        self.write_dir_as(parent, &self.name)
    }

    /// Write the package into a folder named `folder`, which may differ from
    /// the manifest name.
    pub fn write_dir_as(&self, parent: &Path, folder: &str) -> PathBuf {
        let dir = parent.join(folder);
        fs::create_dir_all(&dir).unwrap();
        for (rel, content) in self.entries() {
            let path = dir.join(&rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    /// Write the package as a zip archive with the manifest at its root.
    pub fn write_zip(&self, path: &Path) -> PathBuf {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (rel, content) in self.entries() {
            writer
                .start_file(rel.as_str(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(&content).unwrap();
        }
        writer.finish().unwrap();
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_and_zip_carry_the_same_files() {
        let dir = tempfile::tempdir().unwrap();
        let demo = PackageBuilder::addon("demo").install_file("app/a.php", "a");

        let unpacked = demo.write_dir(dir.path());
        assert!(unpacked.join("info.ini").is_file());
        assert!(unpacked.join("install/app/a.php").is_file());

        let archive = demo.write_zip(&dir.path().join("out/demo.zip"));
        let zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
    }
}
