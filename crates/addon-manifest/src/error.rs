use std::path::PathBuf;

use crate::ini::IniError;

/// Errors raised while reading a package manifest.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `info.ini` is absent from the package root.
    #[error("info.ini not exist: {0}")]
    ManifestMissing(PathBuf),

    /// The manifest scanned to nothing or could not be scanned.
    #[error("the content of {path} is not in the correct format: {reason}")]
    ManifestMalformed { path: PathBuf, reason: String },

    /// A required key is absent, or the declared name does not match the
    /// package folder.
    #[error("incomplete manifest {path}: {reason}")]
    ManifestIncomplete { path: PathBuf, reason: String },

    /// The manifest `name` is not a valid package identifier.
    #[error("invalid package name '{0}': only letters, numbers and underscores are allowed, starting with a letter")]
    InvalidName(String),

    /// Unknown package kind.
    #[error("unknown package kind '{0}'")]
    UnknownKind(String),

    /// The archive could not be opened or read.
    #[error("failed to read archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fs(#[from] addon_fs::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, err: &IniError) -> Self {
        Self::ManifestMalformed {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
