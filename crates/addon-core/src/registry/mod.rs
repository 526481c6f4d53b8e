//! Package registry
//!
//! The registry is the persisted list of installed packages plus site
//! settings such as the active theme of each module (`<module>_theme`).
//! It is saved as TOML under the runtime directory and cached in memory
//! after the first read.

mod record;

pub use record::{PackageRecord, PackageRef, STATUS_DISABLED, STATUS_ENABLED};

use crate::{Error, Result};
use addon_manifest::PackageKind;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

/// On-disk registry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryFile {
    /// Format version for forward compatibility
    version: String,
    #[serde(default)]
    settings: BTreeMap<String, String>,
    #[serde(default)]
    packages: Vec<PackageRecord>,
}

impl RegistryFile {
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            settings: BTreeMap::new(),
            packages: Vec::new(),
        }
    }

    /// Load with a shared lock. A missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(Error::io(path, e)),
        };
        file.lock_shared().map_err(|e| Error::io(path, e))?;

        let mut content = String::new();
        (&file)
            .read_to_string(&mut content)
            .map_err(|e| Error::io(path, e))?;
        Ok(toml::from_str(&content)?)
    }

    /// Save atomically under an exclusive lock.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        lock_file.lock_exclusive().map_err(|e| Error::io(path, e))?;

        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, &content).map_err(|e| Error::io(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))?;
        Ok(())
    }

    pub fn packages(&self) -> &[PackageRecord] {
        &self.packages
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }
}

/// Cached access to the registry file.
#[derive(Debug)]
pub struct PackageRegistry {
    path: PathBuf,
    no_cache: bool,
    cache: Option<RegistryFile>,
}

impl PackageRegistry {
    /// Open the registry at `path`. Nothing is read until first use.
    pub fn open(path: impl Into<PathBuf>, no_cache: bool) -> Self {
        Self {
            path: path.into(),
            no_cache,
            cache: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the cached copy so the next read goes to disk.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    fn state(&mut self) -> Result<&mut RegistryFile> {
        if self.no_cache {
            self.cache = None;
        }
        if self.cache.is_none() {
            tracing::debug!(path = ?self.path, "loading registry");
            self.cache = Some(RegistryFile::load(&self.path)?);
        }
        Ok(self.cache.get_or_insert_with(RegistryFile::new))
    }

    /// Save the in-memory copy. Never reloads, even with `no_cache`.
    fn persist(&self) -> Result<()> {
        match &self.cache {
            Some(state) => state.save(&self.path),
            None => Ok(()),
        }
    }

    /// Find the row `target` refers to.
    pub fn get(&mut self, target: &PackageRef) -> Result<Option<PackageRecord>> {
        Ok(self
            .state()?
            .packages
            .iter()
            .find(|r| r.matches(target))
            .cloned())
    }

    /// Find an addon or module row by name.
    pub fn find_addon(&mut self, name: &str) -> Result<Option<PackageRecord>> {
        Ok(self
            .state()?
            .packages
            .iter()
            .find(|r| r.kind != PackageKind::Template && r.name == name)
            .cloned())
    }

    /// Rows of one kind.
    pub fn list(&mut self, kind: PackageKind) -> Result<Vec<PackageRecord>> {
        Ok(self
            .state()?
            .packages
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    /// Insert a row, replacing any row with the same identity.
    pub fn upsert(&mut self, record: PackageRecord) -> Result<()> {
        let target = PackageRef {
            kind: record.kind,
            name: record.name.clone(),
            module: record.module.clone(),
        };
        let state = self.state()?;
        match state.packages.iter_mut().find(|r| r.matches(&target)) {
            Some(slot) => *slot = record,
            None => state.packages.push(record),
        }
        self.persist()
    }

    pub fn set_status(&mut self, target: &PackageRef, status: i64) -> Result<()> {
        let state = self.state()?;
        let record = state
            .packages
            .iter_mut()
            .find(|r| r.matches(target))
            .ok_or_else(|| Error::NotInstalled(target.name.clone()))?;
        record.status = status;
        self.persist()
    }

    /// Remove the row `target` refers to.
    pub fn remove(&mut self, target: &PackageRef) -> Result<Option<PackageRecord>> {
        let state = self.state()?;
        let Some(idx) = state.packages.iter().position(|r| r.matches(target)) else {
            return Ok(None);
        };
        let removed = state.packages.remove(idx);
        self.persist()?;
        Ok(Some(removed))
    }

    /// Remove every template row owned by `module`.
    pub fn remove_templates_of(&mut self, module: &str) -> Result<usize> {
        let state = self.state()?;
        let before = state.packages.len();
        state
            .packages
            .retain(|r| !(r.kind == PackageKind::Template && r.module.as_deref() == Some(module)));
        let removed = before - state.packages.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn setting(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.state()?.settings.get(key).cloned())
    }

    pub fn set_setting(&mut self, key: &str, value: &str) -> Result<()> {
        self.state()?
            .settings
            .insert(key.to_string(), value.to_string());
        self.persist()
    }

    pub fn remove_setting(&mut self, key: &str) -> Result<Option<String>> {
        let removed = self.state()?.settings.remove(key);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Active theme of a module, from the `<module>_theme` setting.
    pub fn theme_of(&mut self, module: &str) -> Result<Option<String>> {
        self.setting(&theme_setting(module))
    }
}

/// Setting key holding the active theme of `module`.
pub fn theme_setting(module: &str) -> String {
    format!("{module}_theme")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn record(kind: PackageKind, name: &str, module: Option<&str>) -> PackageRecord {
        PackageRecord {
            name: name.into(),
            kind,
            title: name.to_uppercase(),
            description: None,
            author: "someone".into(),
            version: "1.0.0".into(),
            status: STATUS_ENABLED,
            module: module.map(str::to_string),
            installed_at: Utc::now(),
            config: BTreeMap::new(),
        }
    }

    #[test]
    fn registry_save_is_atomic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runtime/registry.toml");
        let mut registry = PackageRegistry::open(&path, false);

        registry
            .upsert(record(PackageKind::Addon, "demo", None))
            .unwrap();

        assert!(!path.with_extension("toml.tmp").exists());
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("version = \"1.0\""));
        assert!(raw.contains("name = \"demo\""));
        assert_eq!(RegistryFile::load(&path).unwrap().packages().len(), 1);
    }

    #[test]
    fn missing_file_is_empty_registry() {
        let dir = tempdir().unwrap();
        let mut registry = PackageRegistry::open(dir.path().join("registry.toml"), false);
        assert!(registry.list(PackageKind::Addon).unwrap().is_empty());
    }

    #[test]
    fn templates_are_scoped_by_module() {
        let dir = tempdir().unwrap();
        let mut registry = PackageRegistry::open(dir.path().join("registry.toml"), false);
        registry
            .upsert(record(PackageKind::Template, "default", Some("index")))
            .unwrap();
        registry
            .upsert(record(PackageKind::Template, "default", Some("shop")))
            .unwrap();

        assert_eq!(registry.list(PackageKind::Template).unwrap().len(), 2);
        assert_eq!(registry.remove_templates_of("shop").unwrap(), 1);
        assert!(registry
            .get(&PackageRef::template("index", "default"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn cache_hides_external_writes_until_invalidated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        let mut registry = PackageRegistry::open(&path, false);
        assert!(registry.find_addon("demo").unwrap().is_none());

        let mut other = PackageRegistry::open(&path, false);
        other.upsert(record(PackageKind::Addon, "demo", None)).unwrap();

        assert!(registry.find_addon("demo").unwrap().is_none());
        registry.invalidate();
        assert!(registry.find_addon("demo").unwrap().is_some());
    }

    #[test]
    fn no_cache_rereads_every_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        let mut registry = PackageRegistry::open(&path, true);
        assert!(registry.find_addon("demo").unwrap().is_none());

        PackageRegistry::open(&path, false)
            .upsert(record(PackageKind::Addon, "demo", None))
            .unwrap();

        assert!(registry.find_addon("demo").unwrap().is_some());
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        let mut registry = PackageRegistry::open(&path, false);
        registry.set_setting(&theme_setting("index"), "default").unwrap();

        let mut reopened = PackageRegistry::open(&path, false);
        assert_eq!(reopened.theme_of("index").unwrap().as_deref(), Some("default"));
        assert_eq!(reopened.remove_setting("index_theme").unwrap().as_deref(), Some("default"));
        assert!(reopened.theme_of("index").unwrap().is_none());
    }

    #[test]
    fn set_status_on_unknown_package_fails() {
        let dir = tempdir().unwrap();
        let mut registry = PackageRegistry::open(dir.path().join("registry.toml"), false);
        assert!(matches!(
            registry.set_status(&PackageRef::addon("ghost"), STATUS_DISABLED),
            Err(Error::NotInstalled(_))
        ));
    }
}
