//! Error types for addon-core

use std::fmt;
use std::path::{Path, PathBuf};

/// Result type for addon-core operations
pub type Result<T> = std::result::Result<T, Error>;

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Reasons the Conflict Detector refuses an install or upgrade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    /// A destination the package would occupy already exists
    #[error("{0} existed")]
    Exists(String),

    /// A destination exists but cannot be written
    #[error("{} no permission to write", .0.display())]
    NotWritable(PathBuf),

    /// A directory the package must be placed into does not exist
    #[error("{} not exist", .0.display())]
    MissingTarget(PathBuf),

    /// Overlay files would land on existing files
    #[error("{} existed", join_paths(.0))]
    OverlayCollision(Vec<PathBuf>),
}

/// Errors that can occur in addon-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Manifest could not be read or validated
    #[error(transparent)]
    Manifest(#[from] addon_manifest::Error),

    /// Destination checks refused the operation
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The archive could not be extracted into staging
    #[error("failed to extract {archive}: {message}")]
    Extraction { archive: PathBuf, message: String },

    /// Nothing to merge
    #[error("{} is empty, nothing to merge", .0.display())]
    EmptySource(PathBuf),

    #[error("failed to create directory {path}: {source}")]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Strict merge found files already present at the destination
    #[error("{} existed", join_paths(.0))]
    DestinationExists(Vec<PathBuf>),

    /// An existing destination file could not be replaced
    #[error("{path} no permission to write: {source}")]
    DestinationNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to place {from} at {to}: {reason}")]
    MergeWriteFailed {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    /// Non-forced enable found overlay files already present
    #[error("{category}: {} existed", join_paths(.paths))]
    OverlayConflict {
        category: &'static str,
        paths: Vec<PathBuf>,
    },

    /// Disable found an overlay path it cannot delete
    #[error("{} no permission to write", .0.display())]
    NotWritable(PathBuf),

    /// A package callback or the menu registrar failed
    #[error("{hook} hook failed for {package}: {message}")]
    HookFailed {
        package: String,
        hook: &'static str,
        message: String,
    },

    #[error("failed to import {script}: {message}")]
    DatabaseImportFailed { script: PathBuf, message: String },

    /// A template overlay targets a module with no active theme
    #[error("no active theme for module '{module}' (setting {module}_theme is not set)")]
    ThemeUnresolved { module: String },

    /// Another operation holds the package lock
    #[error("package {0} is busy: another operation is in progress")]
    Busy(String),

    #[error("Addon {0} already exists")]
    AlreadyInstalled(String),

    #[error("package {0} is not installed")]
    NotInstalled(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error from addon-fs
    #[error(transparent)]
    Fs(#[from] addon_fs::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

/// Flat classification of [`Error`] for callers that only branch on the
/// failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ManifestMissing,
    ManifestMalformed,
    ManifestIncomplete,
    InvalidName,
    Conflict,
    Extraction,
    EmptySource,
    DirectoryCreateFailed,
    DestinationExists,
    DestinationNotWritable,
    MergeWriteFailed,
    OverlayConflict,
    NotWritable,
    HookFailed,
    DatabaseImportFailed,
    ThemeUnresolved,
    Busy,
    AlreadyInstalled,
    NotInstalled,
    Io,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn hook(package: &str, hook: &'static str, err: impl fmt::Display) -> Self {
        Self::HookFailed {
            package: package.to_string(),
            hook,
            message: err.to_string(),
        }
    }

    pub(crate) fn import(script: &Path, err: impl fmt::Display) -> Self {
        Self::DatabaseImportFailed {
            script: script.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use addon_manifest::Error as M;
        match self {
            Self::Manifest(M::ManifestMissing(_)) => ErrorKind::ManifestMissing,
            Self::Manifest(M::ManifestIncomplete { .. }) => ErrorKind::ManifestIncomplete,
            Self::Manifest(M::InvalidName(_)) => ErrorKind::InvalidName,
            Self::Manifest(M::Archive { .. }) => ErrorKind::Extraction,
            Self::Manifest(M::Io { .. } | M::Fs(_)) => ErrorKind::Io,
            Self::Manifest(M::ManifestMalformed { .. } | M::UnknownKind(_)) => {
                ErrorKind::ManifestMalformed
            }
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::EmptySource(_) => ErrorKind::EmptySource,
            Self::DirectoryCreateFailed { .. } => ErrorKind::DirectoryCreateFailed,
            Self::DestinationExists(_) => ErrorKind::DestinationExists,
            Self::DestinationNotWritable { .. } => ErrorKind::DestinationNotWritable,
            Self::MergeWriteFailed { .. } => ErrorKind::MergeWriteFailed,
            Self::OverlayConflict { .. } => ErrorKind::OverlayConflict,
            Self::NotWritable(_) => ErrorKind::NotWritable,
            Self::HookFailed { .. } => ErrorKind::HookFailed,
            Self::DatabaseImportFailed { .. } => ErrorKind::DatabaseImportFailed,
            Self::ThemeUnresolved { .. } => ErrorKind::ThemeUnresolved,
            Self::Busy(_) => ErrorKind::Busy,
            Self::AlreadyInstalled(_) => ErrorKind::AlreadyInstalled,
            Self::NotInstalled(_) => ErrorKind::NotInstalled,
            Self::Io { .. } => ErrorKind::Io,
            Self::Fs(addon_fs::Error::Io { .. } | addon_fs::Error::Walk { .. }) => ErrorKind::Io,
            Self::Fs(_) | Self::TomlDe(_) | Self::TomlSer(_) => ErrorKind::Config,
        }
    }
}
