//! Manifest Reader: locate, scan and validate `info.ini`.

use std::fs;
use std::io::Read;
use std::path::Path;

use addon_fs::PackageFile;

use crate::descriptor::{PackageDescriptor, PackageKind};
use crate::error::{Error, Result};
use crate::ini::IniDocument;

/// Read and validate the manifest of an extracted package directory.
///
/// The declared `name` must equal the directory's own name.
pub fn read(package_dir: &Path, kind: PackageKind) -> Result<PackageDescriptor> {
    let manifest = package_dir.join(PackageFile::Manifest.as_str());
    if !manifest.is_file() {
        return Err(Error::ManifestMissing(manifest));
    }

    let content = fs::read_to_string(&manifest).map_err(|e| Error::io(&manifest, e))?;
    let doc = IniDocument::parse(&content).map_err(|e| Error::malformed(&manifest, &e))?;
    let descriptor = PackageDescriptor::from_document(&doc, kind, &manifest)?;

    let folder = package_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    check_identity(&descriptor, &folder, "folder", &manifest)?;

    tracing::debug!(name = %descriptor.name, %kind, "read manifest");
    Ok(descriptor)
}

/// Read and validate the manifest at the root of a zip archive without
/// extracting it.
///
/// The archive is named after its package: the declared `name` must equal
/// the file stem (`demo.zip` holds `demo`).
pub fn read_archive(archive: &Path, kind: PackageKind) -> Result<PackageDescriptor> {
    let file = fs::File::open(archive).map_err(|e| Error::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| Error::Archive {
        path: archive.to_path_buf(),
        message: e.to_string(),
    })?;

    let origin = archive.join(PackageFile::Manifest.as_str());
    let mut entry = match zip.by_name(PackageFile::Manifest.as_str()) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Err(Error::ManifestMissing(origin)),
        Err(e) => {
            return Err(Error::Archive {
                path: archive.to_path_buf(),
                message: e.to_string(),
            });
        }
    };

    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| Error::ManifestMalformed {
            path: origin.clone(),
            reason: e.to_string(),
        })?;

    let doc = IniDocument::parse(&content).map_err(|e| Error::malformed(&origin, &e))?;
    let descriptor = PackageDescriptor::from_document(&doc, kind, &origin)?;

    let stem = archive
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    check_identity(&descriptor, &stem, "archive", &origin)?;

    tracing::debug!(name = %descriptor.name, %kind, ?archive, "read manifest from archive");
    Ok(descriptor)
}

fn check_identity(
    descriptor: &PackageDescriptor,
    expected: &str,
    origin: &str,
    manifest: &Path,
) -> Result<()> {
    if descriptor.name == expected {
        return Ok(());
    }
    Err(Error::ManifestIncomplete {
        path: manifest.to_path_buf(),
        reason: format!(
            "declared name '{}' does not match {origin} '{expected}'",
            descriptor.name
        ),
    })
}
