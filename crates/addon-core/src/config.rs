//! Engine configuration
//!
//! Loaded from `addons.toml` (or `.json`) through [`addon_fs::ConfigStore`].
//! Every directory is given relative to the site root and may be
//! overridden:
//!
//! ```toml
//! root = "/var/www/site"
//! debug = false
//! default_module = "index"
//! remove_archive_after_install = true
//! import_demo_data = false
//!
//! [dirs]
//! addons = "addons"
//! template = "template"
//! static_addons = "public/static/addons"
//! ```

use std::path::{Path, PathBuf};

use addon_fs::{ConfigStore, NormalizedPath};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Directory names relative to the site root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryNames {
    /// Installed addon and module packages
    pub addons: String,
    /// Application code root, target of `install/app`
    pub app: String,
    /// Public web root, target of `install/public`
    pub public: String,
    /// Module template roots (`<template>/<module>/<theme>`)
    pub template: String,
    /// Module static asset roots (`<static_module>/<module>/<theme>`)
    pub static_module: String,
    /// Addon static assets, target of `install/static`
    pub static_addons: String,
    /// Scratch space: staging, locks, registry
    pub runtime: String,
}

impl Default for DirectoryNames {
    fn default() -> Self {
        Self {
            addons: "addons".into(),
            app: "app".into(),
            public: "public".into(),
            template: "template".into(),
            static_module: "public/static/module".into(),
            static_addons: "public/static/addons".into(),
            runtime: "runtime".into(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub root: PathBuf,
    pub dirs: DirectoryNames,
    /// Debug mode also disables the registry cache.
    pub debug: bool,
    pub default_module: String,
    /// Delete the source archive once an install finishes.
    pub remove_archive_after_install: bool,
    /// Default for importing `demodata.sql` when the caller does not say.
    pub import_demo_data: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            dirs: DirectoryNames::default(),
            debug: false,
            default_module: "index".into(),
            remove_archive_after_install: true,
            import_demo_data: false,
        }
    }
}

impl EngineConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML or JSON file.
    ///
    /// A relative `root` is resolved against the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = ConfigStore::new().load(&NormalizedPath::new(path))?;
        if config.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root = base.join(&config.root);
        }
        tracing::debug!(root = ?config.root, "loaded engine config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ConfigStore::new().save(&NormalizedPath::new(path), self)?;
        Ok(())
    }

    /// Whether registry reads bypass the in-memory cache.
    pub fn no_cache(&self) -> bool {
        self.debug
    }
}
