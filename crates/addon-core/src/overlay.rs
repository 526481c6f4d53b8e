//! Install-Manifest Tracker
//!
//! An addon may ship an `install/` tree whose top-level folders are copied
//! into the site when the addon is enabled and removed again when it is
//! disabled:
//!
//! | payload folder        | destination                          |
//! |-----------------------|--------------------------------------|
//! | `app/`                | application code root                |
//! | `public/`             | public web root                      |
//! | `template/<module>/`  | active theme of `<module>`           |
//! | `static/`             | `public/static/addons/<name>/`       |
//!
//! The destination list is recomputed from the payload every time, so a
//! disable does not depend on state saved by the enable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use addon_fs::{NormalizedPath, PackageFile};
use addon_manifest::PackageKind;

use crate::conflict::ConflictEntry;
use crate::hooks::AddonHooks;
use crate::layout::SiteLayout;
use crate::merge::{MergePolicy, MergeRecord, Transfer, TreeMerger};
use crate::registry::{PackageRecord, PackageRegistry, STATUS_ENABLED, theme_setting};
use crate::{Error, Result};

/// Top-level folder of an `install/` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OverlayCategory {
    App,
    Public,
    Template,
    Static,
}

impl OverlayCategory {
    /// Processing order.
    pub const ALL: [Self; 4] = [Self::App, Self::Public, Self::Template, Self::Static];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Public => "public",
            Self::Template => "template",
            Self::Static => "static",
        }
    }
}

impl fmt::Display for OverlayCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files of an `install/` payload, relative to `install/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadIndex {
    files: Vec<NormalizedPath>,
}

impl PayloadIndex {
    /// Index the `install/` directory of an unpacked package. A missing
    /// directory is an empty payload.
    pub fn from_install_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Ok(Self::default());
        }
        let files = addon_fs::walk_tree(dir)?
            .into_iter()
            .filter(|e| e.kind == addon_fs::EntryKind::File)
            .map(|e| e.relative)
            .collect();
        Ok(Self { files })
    }

    /// Index from package-relative file names, such as an archive listing.
    pub fn from_package_entries(entries: impl IntoIterator<Item = NormalizedPath>) -> Self {
        let install = NormalizedPath::new(PackageFile::InstallDir.as_str());
        let mut files: Vec<NormalizedPath> = entries
            .into_iter()
            .filter_map(|p| p.strip_prefix(&install))
            .filter(|p| p.as_str() != ".")
            .collect();
        files.sort();
        files.dedup();
        Self { files }
    }

    pub fn files(&self) -> &[NormalizedPath] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files below `prefix`, relative to it.
    pub fn files_under(&self, prefix: &NormalizedPath) -> Vec<NormalizedPath> {
        self.files
            .iter()
            .filter_map(|f| f.strip_prefix(prefix))
            .filter(|r| r.as_str() != ".")
            .collect()
    }

    /// Directories implied by the files below `prefix`, relative to it.
    fn dirs_under(&self, prefix: &NormalizedPath) -> BTreeSet<NormalizedPath> {
        let mut dirs = BTreeSet::new();
        for file in self.files_under(prefix) {
            let mut current = file.parent();
            while let Some(dir) = current {
                current = dir.parent();
                dirs.insert(dir);
            }
        }
        dirs
    }

    /// Module folders under `template/` that contain at least one file.
    pub fn template_modules(&self) -> Vec<String> {
        let mut modules: Vec<String> = self
            .files
            .iter()
            .filter_map(|f| {
                let mut parts = f.components();
                if parts.next()? != OverlayCategory::Template.as_str() {
                    return None;
                }
                let module = parts.next()?;
                parts.next()?;
                Some(module.to_string())
            })
            .collect();
        modules.sort();
        modules.dedup();
        modules
    }

    /// Theme folder of `template/<name>/<theme>/info.ini`, when the package
    /// ships its own theme.
    pub fn own_theme(&self, name: &str) -> Option<String> {
        self.files.iter().find_map(|f| {
            let parts: Vec<&str> = f.components().collect();
            match parts.as_slice() {
                [category, module, theme, manifest]
                    if *category == OverlayCategory::Template.as_str()
                        && *module == name
                        && *manifest == PackageFile::Manifest.as_str() =>
                {
                    Some(theme.to_string())
                }
                _ => None,
            }
        })
    }
}

/// Payload folder mapped onto its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRoot {
    pub category: OverlayCategory,
    /// Folder inside `install/`, e.g. `template/index`
    pub prefix: NormalizedPath,
    pub destination: PathBuf,
    /// Set when this root installs the package's own theme
    pub own_theme: Option<String>,
}

/// What an enable placed or a disable removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayRecord {
    pub files: BTreeMap<OverlayCategory, Vec<PathBuf>>,
    /// Directories created by an enable or pruned by a disable
    pub directories: Vec<PathBuf>,
    /// Directories owned wholesale by the package
    pub owned_roots: Vec<PathBuf>,
    pub own_theme: Option<String>,
}

impl OverlayRecord {
    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn files_of(&self, category: OverlayCategory) -> &[PathBuf] {
        self.files.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Enable,
    Disable,
    Inspect,
}

/// Applies and removes `install/` overlays for one site.
#[derive(Debug, Clone, Copy)]
pub struct OverlayTracker<'a> {
    layout: &'a SiteLayout,
}

impl<'a> OverlayTracker<'a> {
    pub fn new(layout: &'a SiteLayout) -> Self {
        Self { layout }
    }

    fn resolve_roots(
        &self,
        name: &str,
        index: &PayloadIndex,
        registry: &mut PackageRegistry,
        category: OverlayCategory,
        purpose: Purpose,
    ) -> Result<Vec<OverlayRoot>> {
        let plain = |destination: PathBuf| OverlayRoot {
            category,
            prefix: NormalizedPath::new(category.as_str()),
            destination,
            own_theme: None,
        };

        let has_files = !index
            .files_under(&NormalizedPath::new(category.as_str()))
            .is_empty();
        let roots = match category {
            _ if !has_files => Vec::new(),
            OverlayCategory::App => vec![plain(self.layout.app_dir().to_path_buf())],
            OverlayCategory::Public => vec![plain(self.layout.public_dir().to_path_buf())],
            OverlayCategory::Static => vec![plain(self.layout.static_addons_dir().join(name))],
            OverlayCategory::Template => self.template_roots(name, index, registry, purpose)?,
        };
        Ok(roots)
    }

    fn template_roots(
        &self,
        name: &str,
        index: &PayloadIndex,
        registry: &mut PackageRegistry,
        purpose: Purpose,
    ) -> Result<Vec<OverlayRoot>> {
        let mut roots = Vec::new();
        for module in index.template_modules() {
            let prefix = NormalizedPath::new(OverlayCategory::Template.as_str()).join(&module);
            let setting = registry.theme_of(&module)?;

            if module == name {
                let own = index.own_theme(name).filter(|_| match purpose {
                    Purpose::Enable | Purpose::Inspect => setting.is_none(),
                    Purpose::Disable => setting.is_some(),
                });
                if let Some(theme) = own {
                    roots.push(OverlayRoot {
                        category: OverlayCategory::Template,
                        prefix,
                        destination: self.layout.template_dir().join(name),
                        own_theme: Some(theme),
                    });
                    continue;
                }
            }

            match setting {
                Some(theme) => roots.push(OverlayRoot {
                    category: OverlayCategory::Template,
                    prefix,
                    destination: self.layout.template_dir().join(&module).join(theme),
                    own_theme: None,
                }),
                None if purpose == Purpose::Enable => {
                    return Err(Error::ThemeUnresolved { module });
                }
                None => tracing::debug!(%module, "no active theme, template overlay skipped"),
            }
        }
        Ok(roots)
    }

    fn roots(
        &self,
        name: &str,
        index: &PayloadIndex,
        registry: &mut PackageRegistry,
        purpose: Purpose,
    ) -> Result<Vec<OverlayRoot>> {
        let mut roots = Vec::new();
        for category in OverlayCategory::ALL {
            roots.extend(self.resolve_roots(name, index, registry, category, purpose)?);
        }
        Ok(roots)
    }

    /// Destinations that already exist or sit in an unwritable directory.
    /// Modules without an active theme are skipped.
    pub fn collisions(
        &self,
        name: &str,
        index: &PayloadIndex,
        registry: &mut PackageRegistry,
    ) -> Result<Vec<ConflictEntry>> {
        let roots = self.roots(name, index, registry, Purpose::Inspect)?;
        Ok(scan(index, &roots))
    }

    /// Like [`collisions`](Self::collisions), but fails with
    /// `ThemeUnresolved` where an enable would.
    pub fn enable_collisions(
        &self,
        name: &str,
        index: &PayloadIndex,
        registry: &mut PackageRegistry,
    ) -> Result<Vec<ConflictEntry>> {
        let roots = self.roots(name, index, registry, Purpose::Enable)?;
        Ok(scan(index, &roots))
    }

    /// Copy the overlay of installed addon `name` into the site.
    ///
    /// Without `force` a category whose destinations already exist fails
    /// with `OverlayConflict` before anything of it is copied; categories
    /// handled earlier stay in place and in `record`.
    pub fn enable(
        &self,
        name: &str,
        force: bool,
        registry: &mut PackageRegistry,
        hooks: Option<&dyn AddonHooks>,
        record: &mut MergeRecord,
    ) -> Result<OverlayRecord> {
        let install_dir = self.layout.install_dir(name);
        let index = PayloadIndex::from_install_dir(&install_dir)?;
        let merger = TreeMerger::new(MergePolicy::force(Transfer::Copy));
        let mut overlay = OverlayRecord::default();

        for category in OverlayCategory::ALL {
            let roots = self.resolve_roots(name, &index, registry, category, Purpose::Enable)?;
            if roots.is_empty() {
                continue;
            }

            if !force {
                let existing: Vec<PathBuf> = roots
                    .iter()
                    .flat_map(|root| destinations(&index, root))
                    .filter(|path| path.exists())
                    .collect();
                if !existing.is_empty() {
                    return Err(Error::OverlayConflict {
                        category: category.as_str(),
                        paths: existing,
                    });
                }
            }

            let mut placed = MergeRecord::new();
            for root in &roots {
                let source = install_dir.join(root.prefix.as_str());
                if let Err(e) = merger.merge_into(&source, &root.destination, &mut placed) {
                    placed.rollback();
                    return Err(e);
                }
                if root.own_theme.is_some() {
                    overlay.own_theme = root.own_theme.clone();
                }
            }
            if category == OverlayCategory::Static {
                overlay.owned_roots.extend(roots.iter().map(|r| r.destination.clone()));
            }

            tracing::debug!(%name, %category, files = placed.files.len(), "overlay copied");
            overlay
                .files
                .insert(category, placed.files.iter().map(|f| f.path.clone()).collect());
            overlay.directories.extend(placed.directories.iter().cloned());
            record.extend(placed);
        }

        if let Some(theme) = overlay.own_theme.clone() {
            if let Err(e) = self.register_own_theme(name, &theme, registry) {
                self.forget_own_theme(name, registry);
                return Err(e);
            }
        }

        if let Some(hooks) = hooks.filter(|h| h.capabilities().enable) {
            if let Err(e) = hooks.enable() {
                if overlay.own_theme.is_some() {
                    self.forget_own_theme(name, registry);
                }
                return Err(Error::hook(name, "enable", e));
            }
        }

        tracing::info!(%name, files = overlay.file_count(), "overlay enabled");
        Ok(overlay)
    }

    /// Remove the overlay of installed addon `name` from the site.
    ///
    /// Every path is permission-checked before the first deletion. Files
    /// already gone are skipped, so running it twice is safe.
    pub fn disable(
        &self,
        name: &str,
        registry: &mut PackageRegistry,
        hooks: Option<&dyn AddonHooks>,
    ) -> Result<OverlayRecord> {
        let index = PayloadIndex::from_install_dir(&self.layout.install_dir(name))?;
        let roots = self.roots(name, &index, registry, Purpose::Disable)?;

        let mut files: Vec<(OverlayCategory, PathBuf)> = Vec::new();
        let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
        let mut owned: Vec<PathBuf> = Vec::new();
        let mut own_theme = None;

        for root in &roots {
            if let Some(theme) = &root.own_theme {
                own_theme = Some(theme.clone());
                owned.push(self.layout.template_dir().join(name));
                owned.push(self.layout.static_module_dir().join(name));
                continue;
            }
            if root.category == OverlayCategory::Static {
                owned.push(root.destination.clone());
                continue;
            }
            files.extend(
                destinations(&index, root)
                    .into_iter()
                    .filter(|p| p.is_file())
                    .map(|p| (root.category, p)),
            );
            dirs.extend(
                index
                    .dirs_under(&root.prefix)
                    .iter()
                    .map(|d| root.destination.join(d.as_str()))
                    .filter(|d| d.is_dir()),
            );
        }

        let parents: BTreeSet<&Path> = files
            .iter()
            .map(|(_, p)| p.as_path())
            .chain(owned.iter().filter(|p| p.exists()).map(PathBuf::as_path))
            .filter_map(Path::parent)
            .collect();
        if let Some(denied) = parents.into_iter().find(|p| !addon_fs::io::is_writable(p)) {
            return Err(Error::NotWritable(denied.to_path_buf()));
        }

        let mut overlay = OverlayRecord {
            own_theme,
            ..OverlayRecord::default()
        };
        for (category, path) in files {
            if addon_fs::io::remove_file_if_exists(&path)? {
                overlay.files.entry(category).or_default().push(path);
            }
        }

        let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            if dir.is_dir() && matches!(addon_fs::io::is_dir_empty(&dir), Ok(true)) {
                fs::remove_dir(&dir).map_err(|e| Error::io(&dir, e))?;
                overlay.directories.push(dir);
            }
        }

        for root in owned {
            if addon_fs::io::remove_dir_all_if_exists(&root)? {
                overlay.owned_roots.push(root);
            }
        }

        if overlay.own_theme.is_some() {
            registry.remove_templates_of(name)?;
            registry.remove_setting(&theme_setting(name))?;
        }

        if let Some(hooks) = hooks.filter(|h| h.capabilities().disable) {
            hooks.disable().map_err(|e| Error::hook(name, "disable", e))?;
        }

        tracing::info!(%name, files = overlay.file_count(), "overlay disabled");
        Ok(overlay)
    }

    fn register_own_theme(
        &self,
        name: &str,
        theme: &str,
        registry: &mut PackageRegistry,
    ) -> Result<()> {
        let theme_dir = self.layout.template_dir().join(name).join(theme);
        let descriptor = addon_manifest::read(&theme_dir, PackageKind::Template)?;
        let mut row = PackageRecord::from_descriptor(&descriptor, STATUS_ENABLED);
        row.module = Some(name.to_string());
        registry.upsert(row)?;
        registry.set_setting(&theme_setting(name), theme)?;
        tracing::debug!(%name, %theme, "registered bundled theme");
        Ok(())
    }

    fn forget_own_theme(&self, name: &str, registry: &mut PackageRegistry) {
        let result = registry
            .remove_templates_of(name)
            .and_then(|_| registry.remove_setting(&theme_setting(name)));
        if let Err(e) = result {
            tracing::warn!(%name, error = %e, "failed to remove bundled theme rows");
        }
    }
}

fn destinations(index: &PayloadIndex, root: &OverlayRoot) -> Vec<PathBuf> {
    index
        .files_under(&root.prefix)
        .iter()
        .map(|rel| root.destination.join(rel.as_str()))
        .collect()
}

/// Classify each destination of `roots`: existing files, or files whose
/// nearest existing ancestor cannot be written.
fn scan(index: &PayloadIndex, roots: &[OverlayRoot]) -> Vec<ConflictEntry> {
    let mut entries = Vec::new();
    let mut denied: BTreeSet<PathBuf> = BTreeSet::new();
    for root in roots {
        for path in destinations(index, root) {
            if path.exists() {
                entries.push(ConflictEntry::exists(&path, path.display().to_string()));
                continue;
            }
            let ancestor = path.ancestors().skip(1).find(|p| p.exists());
            if let Some(ancestor) = ancestor {
                if !addon_fs::io::is_writable(ancestor) && denied.insert(ancestor.to_path_buf()) {
                    entries.push(ConflictEntry::not_writable(ancestor));
                }
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Site {
        _dir: TempDir,
        layout: SiteLayout,
        registry: PackageRegistry,
    }

    fn site() -> Site {
        let dir = tempfile::tempdir().unwrap();
        let layout = SiteLayout::new(&EngineConfig::new(dir.path()));
        let registry = PackageRegistry::open(layout.registry_path(), false);
        Site {
            _dir: dir,
            layout,
            registry,
        }
    }

    fn payload(site: &Site, name: &str, files: &[&str]) {
        let install = site.layout.install_dir(name);
        for file in files {
            let path = install.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("content of {file}")).unwrap();
        }
    }

    fn paths(entries: &[&str]) -> Vec<NormalizedPath> {
        entries.iter().map(NormalizedPath::new).collect()
    }

    #[test]
    fn index_from_archive_listing() {
        let index = PayloadIndex::from_package_entries(paths(&[
            "info.ini",
            "install/app/a.php",
            "install/template/index/x.html",
            "install/template/loose.html",
        ]));
        assert_eq!(index.files().len(), 3);
        assert_eq!(index.template_modules(), vec!["index".to_string()]);
    }

    #[test]
    fn own_theme_detection() {
        let index = PayloadIndex::from_package_entries(paths(&[
            "install/template/shop/default/info.ini",
            "install/template/index/x.html",
        ]));
        assert_eq!(index.own_theme("shop"), Some("default".to_string()));
        assert_eq!(index.own_theme("index"), None);
    }

    #[test]
    fn enable_then_disable_restores_site() {
        let mut site = site();
        payload(
            &site,
            "demo",
            &["app/controller/Demo.php", "public/demo.js", "static/logo.png"],
        );
        fs::create_dir_all(site.layout.app_dir()).unwrap();
        fs::write(site.layout.app_dir().join("keep.php"), "x").unwrap();

        let tracker = OverlayTracker::new(&site.layout);
        let mut record = MergeRecord::new();
        let enabled = tracker
            .enable("demo", false, &mut site.registry, None, &mut record)
            .unwrap();
        assert_eq!(enabled.file_count(), 3);
        assert_eq!(record.created_files().count(), 3);
        assert!(site.layout.app_dir().join("controller/Demo.php").is_file());
        assert!(site.layout.static_addons_dir().join("demo/logo.png").is_file());

        let disabled = tracker.disable("demo", &mut site.registry, None).unwrap();
        assert_eq!(disabled.file_count(), 2);
        assert!(!site.layout.app_dir().join("controller").exists());
        assert!(site.layout.app_dir().join("keep.php").is_file());
        assert!(!site.layout.static_addons_dir().join("demo").exists());

        let again = tracker.disable("demo", &mut site.registry, None).unwrap();
        assert_eq!(again.file_count(), 0);
    }

    #[test]
    fn existing_destination_blocks_category() {
        let mut site = site();
        payload(&site, "demo", &["app/a.php", "public/b.js"]);
        fs::create_dir_all(site.layout.public_dir()).unwrap();
        fs::write(site.layout.public_dir().join("b.js"), "theirs").unwrap();

        let tracker = OverlayTracker::new(&site.layout);
        let mut record = MergeRecord::new();
        let err = tracker
            .enable("demo", false, &mut site.registry, None, &mut record)
            .unwrap_err();
        assert!(matches!(err, Error::OverlayConflict { category: "public", .. }));
        // app was handled first and stays
        assert!(site.layout.app_dir().join("a.php").is_file());
        assert_eq!(
            fs::read_to_string(site.layout.public_dir().join("b.js")).unwrap(),
            "theirs"
        );
    }

    #[test]
    fn template_without_theme_is_unresolved() {
        let mut site = site();
        payload(&site, "demo", &["template/index/demo.html"]);
        let tracker = OverlayTracker::new(&site.layout);

        let err = tracker
            .enable("demo", false, &mut site.registry, None, &mut MergeRecord::new())
            .unwrap_err();
        assert!(matches!(err, Error::ThemeUnresolved { ref module } if module == "index"));

        // disable skips the module instead
        tracker.disable("demo", &mut site.registry, None).unwrap();
    }

    #[test]
    fn template_goes_to_active_theme() {
        let mut site = site();
        payload(&site, "demo", &["template/index/demo/list.html"]);
        site.registry.set_setting("index_theme", "dark").unwrap();

        let tracker = OverlayTracker::new(&site.layout);
        tracker
            .enable("demo", false, &mut site.registry, None, &mut MergeRecord::new())
            .unwrap();
        let placed = site.layout.template_dir().join("index/dark/demo/list.html");
        assert!(placed.is_file());

        tracker.disable("demo", &mut site.registry, None).unwrap();
        assert!(!placed.exists());
        assert!(site.layout.template_dir().join("index/dark").is_dir());
    }

    #[test]
    fn bundled_theme_is_registered_and_removed() {
        let mut site = site();
        payload(&site, "shop", &["template/shop/default/list.html"]);
        fs::write(
            site.layout.install_dir("shop").join("template/shop/default/info.ini"),
            "type = template\nmodule = shop\nname = default\ntitle = Default\nauthor = a\nversion = 1.0.0\n",
        )
        .unwrap();

        let tracker = OverlayTracker::new(&site.layout);
        let enabled = tracker
            .enable("shop", false, &mut site.registry, None, &mut MergeRecord::new())
            .unwrap();
        assert_eq!(enabled.own_theme.as_deref(), Some("default"));
        assert!(site.layout.template_dir().join("shop/default/list.html").is_file());
        assert_eq!(site.registry.theme_of("shop").unwrap().as_deref(), Some("default"));
        assert_eq!(site.registry.list(PackageKind::Template).unwrap().len(), 1);

        tracker.disable("shop", &mut site.registry, None).unwrap();
        assert!(!site.layout.template_dir().join("shop").exists());
        assert_eq!(site.registry.theme_of("shop").unwrap(), None);
        assert!(site.registry.list(PackageKind::Template).unwrap().is_empty());
    }

    #[test]
    fn collisions_report_existing_files() {
        let mut site = site();
        fs::create_dir_all(site.layout.app_dir()).unwrap();
        fs::write(site.layout.app_dir().join("a.php"), "x").unwrap();
        let index = PayloadIndex::from_package_entries(paths(&[
            "install/app/a.php",
            "install/app/b.php",
            "install/template/index/t.html",
        ]));

        let tracker = OverlayTracker::new(&site.layout);
        let found = tracker.collisions("demo", &index, &mut site.registry).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, site.layout.app_dir().join("a.php"));

        let err = tracker
            .enable_collisions("demo", &index, &mut site.registry)
            .unwrap_err();
        assert!(matches!(err, Error::ThemeUnresolved { .. }));
    }
}
