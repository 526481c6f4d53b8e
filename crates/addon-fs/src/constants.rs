//! Well-known file and directory names inside a package.

use std::path::Path;

/// Files and folders the engine looks for at a package root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFile {
    /// The `info.ini` manifest
    Manifest,
    /// The `install/` overlay tree
    InstallDir,
    /// The `static/` asset folder of a template package
    StaticDir,
    /// Install-time schema and data
    InstallSql,
    /// Upgrade-time migration
    UpgradeSql,
    /// Optional demo content
    DemoSql,
    /// Removes demo content on uninstall
    UnDemoSql,
}

impl PackageFile {
    /// Get the string representation of the path.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manifest => "info.ini",
            Self::InstallDir => "install",
            Self::StaticDir => "static",
            Self::InstallSql => "install.sql",
            Self::UpgradeSql => "upgrade.sql",
            Self::DemoSql => "demodata.sql",
            Self::UnDemoSql => "undemodata.sql",
        }
    }
}

impl AsRef<Path> for PackageFile {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl AsRef<str> for PackageFile {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for PackageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
