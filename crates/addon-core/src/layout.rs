//! Site directory layout derived from [`EngineConfig`].

use std::path::{Path, PathBuf};

use crate::config::EngineConfig;

/// Absolute paths of every directory the engine touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    root: PathBuf,
    addons: PathBuf,
    app: PathBuf,
    public: PathBuf,
    template: PathBuf,
    static_module: PathBuf,
    static_addons: PathBuf,
    runtime: PathBuf,
}

impl SiteLayout {
    pub fn new(config: &EngineConfig) -> Self {
        let root = config.root.clone();
        let dirs = &config.dirs;
        Self {
            addons: root.join(&dirs.addons),
            app: root.join(&dirs.app),
            public: root.join(&dirs.public),
            template: root.join(&dirs.template),
            static_module: root.join(&dirs.static_module),
            static_addons: root.join(&dirs.static_addons),
            runtime: root.join(&dirs.runtime),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn addons_dir(&self) -> &Path {
        &self.addons
    }

    pub fn app_dir(&self) -> &Path {
        &self.app
    }

    pub fn public_dir(&self) -> &Path {
        &self.public
    }

    pub fn template_dir(&self) -> &Path {
        &self.template
    }

    pub fn static_module_dir(&self) -> &Path {
        &self.static_module
    }

    pub fn static_addons_dir(&self) -> &Path {
        &self.static_addons
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime
    }

    /// Live directory of an addon or module.
    pub fn addon_path(&self, name: &str) -> PathBuf {
        self.addons.join(name)
    }

    /// `install/` overlay tree of an installed addon.
    pub fn install_dir(&self, name: &str) -> PathBuf {
        self.addon_path(name).join(addon_fs::PackageFile::InstallDir.as_str())
    }

    /// Template root of a module.
    pub fn template_path(&self, module: &str) -> PathBuf {
        self.template.join(module)
    }

    /// Static asset root of a module.
    pub fn static_path(&self, module: &str) -> PathBuf {
        self.static_module.join(module)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.runtime.join("staging")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.runtime.join("locks")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.runtime.join("registry.toml")
    }
}
