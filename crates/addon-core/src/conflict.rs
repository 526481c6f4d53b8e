//! Conflict Detector
//!
//! Decides whether a package may be placed: target directories exist and
//! are writable, and (outside upgrades) the package is not already there.
//! [`ConflictDetector::check`] collects every violation into a report while
//! [`ConflictDetector::assert_installable`] stops at the first one. Both run
//! the same rules.

use std::path::{Path, PathBuf};

use addon_manifest::{PackageDescriptor, PackageKind, parse_version};

use crate::error::ConflictError;
use crate::hooks::Database;
use crate::layout::SiteLayout;
use crate::overlay::{OverlayTracker, PayloadIndex};
use crate::registry::PackageRegistry;
use crate::{Error, Result};

/// State of one checked destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictState {
    /// A directory the package goes into is missing
    MissingWritableTarget,
    AlreadyExists,
    NotWritable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEntry {
    pub path: PathBuf,
    pub state: ConflictState,
    /// Operator-facing text, e.g. `demo existed`
    pub message: String,
}

impl ConflictEntry {
    pub fn missing(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            state: ConflictState::MissingWritableTarget,
            message: format!("{} not exist", path.display()),
        }
    }

    pub fn exists(path: &Path, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            path: path.to_path_buf(),
            state: ConflictState::AlreadyExists,
            message: format!("{label} existed"),
        }
    }

    pub fn not_writable(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            state: ConflictState::NotWritable,
            message: format!("{} no permission to write", path.display()),
        }
    }

    /// Whether this entry stops an operation.
    pub fn is_blocking(&self, force: bool) -> bool {
        match self.state {
            ConflictState::MissingWritableTarget | ConflictState::NotWritable => true,
            ConflictState::AlreadyExists => !force,
        }
    }

    fn into_error(self) -> ConflictError {
        match self.state {
            ConflictState::MissingWritableTarget => ConflictError::MissingTarget(self.path),
            ConflictState::NotWritable => ConflictError::NotWritable(self.path),
            ConflictState::AlreadyExists => self
                .message
                .strip_suffix(" existed")
                .map(|label| ConflictError::Exists(label.to_string()))
                .unwrap_or(ConflictError::Exists(self.message.clone())),
        }
    }
}

/// Every violation found for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub entries: Vec<ConflictEntry>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: ConflictEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = ConflictEntry>) {
        self.entries.extend(entries);
    }

    pub fn is_blocking(&self, force: bool) -> bool {
        self.entries.iter().any(|e| e.is_blocking(force))
    }

    pub fn with_state(&self, state: ConflictState) -> impl Iterator<Item = &ConflictEntry> {
        self.entries.iter().filter(move |e| e.state == state)
    }
}

/// Runs the placement rules against a site layout.
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector<'a> {
    layout: &'a SiteLayout,
    default_module: &'a str,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(layout: &'a SiteLayout, default_module: &'a str) -> Self {
        Self {
            layout,
            default_module,
        }
    }

    /// Collect every violation.
    pub fn check(
        &self,
        descriptor: &PackageDescriptor,
        kind: PackageKind,
        is_upgrade: bool,
        force: bool,
    ) -> Result<ConflictReport> {
        let mut report = ConflictReport::default();
        self.evaluate(descriptor, kind, is_upgrade, force, &mut |entry| {
            report.push(entry);
            Ok(())
        })?;
        Ok(report)
    }

    /// Fail on the first violation.
    pub fn assert_installable(
        &self,
        descriptor: &PackageDescriptor,
        kind: PackageKind,
        is_upgrade: bool,
        force: bool,
    ) -> Result<()> {
        self.evaluate(descriptor, kind, is_upgrade, force, &mut |entry| {
            Err(Error::Conflict(entry.into_error()))
        })
    }

    fn evaluate(
        &self,
        descriptor: &PackageDescriptor,
        kind: PackageKind,
        is_upgrade: bool,
        force: bool,
        sink: &mut dyn FnMut(ConflictEntry) -> Result<()>,
    ) -> Result<()> {
        let name = descriptor.name.as_str();
        match kind {
            PackageKind::Template => {
                let module = descriptor.module.as_deref().unwrap_or(self.default_module);
                let targets = [
                    self.layout.template_path(module),
                    self.layout.static_path(module),
                ];
                for target in &targets {
                    if !target.is_dir() {
                        sink(ConflictEntry::missing(target))?;
                    } else if !addon_fs::io::is_writable(target) {
                        sink(ConflictEntry::not_writable(target))?;
                    }
                }
                if !is_upgrade && !force {
                    for target in &targets {
                        let occupied = target.join(name);
                        if occupied.is_dir() {
                            sink(ConflictEntry::exists(&occupied, occupied.display().to_string()))?;
                        }
                    }
                }
            }
            PackageKind::Addon | PackageKind::Module => {
                let root = self.layout.addons_dir();
                if root.is_dir() {
                    if !addon_fs::io::is_writable(root) {
                        sink(ConflictEntry::not_writable(root))?;
                    }
                } else if !addon_fs::io::is_creatable(root) {
                    sink(ConflictEntry::missing(root))?;
                }
                if !is_upgrade {
                    let installed = addon_fs::walk::child_dir_names(root)?;
                    if installed.iter().any(|n| n == name) {
                        sink(ConflictEntry::exists(&self.layout.addon_path(name), name))?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Installed state of one declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyStatus {
    pub name: String,
    pub required: String,
    /// Installed version, `None` when not installed
    pub installed: Option<String>,
    pub enabled: bool,
    /// Installed version is at least the required one; `None` when either
    /// version does not parse
    pub satisfied: Option<bool>,
}

impl DependencyStatus {
    pub fn is_met(&self) -> bool {
        self.installed.is_some() && self.satisfied != Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    /// Table name with the database prefix applied
    pub table: String,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirStatus {
    pub path: PathBuf,
    pub writable: bool,
}

/// Everything an operator wants to know before installing a package.
#[derive(Debug, Clone, PartialEq)]
pub struct PreflightReport {
    pub descriptor: PackageDescriptor,
    pub dependencies: Vec<DependencyStatus>,
    pub tables: Vec<TableStatus>,
    pub dirs: Vec<DirStatus>,
    /// The package ships `demodata.sql`
    pub demo_data: bool,
    pub conflicts: ConflictReport,
}

impl PreflightReport {
    pub fn is_ready(&self, force: bool) -> bool {
        !self.conflicts.is_blocking(force)
            && self.dependencies.iter().all(DependencyStatus::is_met)
            && self.dirs.iter().all(|d| d.writable)
    }
}

/// Inputs of a pre-flight check besides the descriptor.
pub struct PreflightContext<'c> {
    pub registry: &'c mut PackageRegistry,
    pub database: &'c dyn Database,
    pub payload: &'c PayloadIndex,
    pub demo_data: bool,
}

impl ConflictDetector<'_> {
    /// Dependency, table, directory and overlay report for `descriptor`.
    pub fn preflight(
        &self,
        descriptor: &PackageDescriptor,
        kind: PackageKind,
        context: PreflightContext<'_>,
    ) -> Result<PreflightReport> {
        let PreflightContext {
            registry,
            database,
            payload,
            demo_data,
        } = context;

        let mut dependencies = Vec::new();
        for (name, required) in &descriptor.addon {
            let row = registry.find_addon(name)?;
            let satisfied = row.as_ref().and_then(|row| {
                Some(parse_version(&row.version)? >= parse_version(required)?)
            });
            dependencies.push(DependencyStatus {
                name: name.clone(),
                required: required.clone(),
                installed: row.as_ref().map(|r| r.version.clone()),
                enabled: row.as_ref().is_some_and(|r| r.is_enabled()),
                satisfied,
            });
        }

        let mut tables = Vec::new();
        if !descriptor.database.is_empty() {
            let existing = database
                .tables()
                .map_err(|e| Error::hook(&descriptor.name, "database", e))?;
            for table in &descriptor.database {
                let table = format!("{}{}", database.table_prefix(), table);
                let exists = existing.contains(&table);
                tables.push(TableStatus { table, exists });
            }
        }

        let mut dirs: Vec<DirStatus> = descriptor
            .dir
            .iter()
            .map(|d| {
                let path = self.layout.root().join(d.trim_start_matches('/'));
                let writable = addon_fs::io::is_writable(&path);
                DirStatus { path, writable }
            })
            .collect();
        if kind != PackageKind::Template {
            let root = self.layout.addons_dir();
            dirs.push(DirStatus {
                path: root.to_path_buf(),
                writable: addon_fs::io::is_writable(root) || addon_fs::io::is_creatable(root),
            });
        }

        let mut conflicts = self.check(descriptor, kind, false, false)?;
        if kind != PackageKind::Template {
            conflicts.extend(OverlayTracker::new(self.layout).collisions(
                &descriptor.name,
                payload,
                registry,
            )?);
        }

        Ok(PreflightReport {
            descriptor: descriptor.clone(),
            dependencies,
            tables,
            dirs,
            demo_data,
            conflicts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use addon_manifest::IniDocument;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    fn descriptor(kind: PackageKind, name: &str) -> PackageDescriptor {
        let text = format!(
            "type = {kind}\nname = {name}\ntitle = T\nauthor = a\nversion = 1.0.0\nstatus = 1\nmodule = index\n"
        );
        PackageDescriptor::from_document(&IniDocument::parse(&text).unwrap(), kind, Path::new("info.ini"))
            .unwrap()
    }

    #[test]
    fn existing_addon_reported_by_name() {
        let dir = tempdir().unwrap();
        let layout = SiteLayout::new(&EngineConfig::new(dir.path()));
        fs::create_dir_all(layout.addon_path("demo")).unwrap();
        let detector = ConflictDetector::new(&layout, "index");
        let demo = descriptor(PackageKind::Addon, "demo");

        let err = detector
            .assert_installable(&demo, PackageKind::Addon, false, false)
            .unwrap_err();
        assert_eq!(err.to_string(), "demo existed");

        let report = detector.check(&demo, PackageKind::Addon, false, false).unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].state, ConflictState::AlreadyExists);
    }

    #[rstest]
    #[case(true, false)]
    #[case(true, true)]
    fn upgrade_ignores_existing_addon(#[case] is_upgrade: bool, #[case] force: bool) {
        let dir = tempdir().unwrap();
        let layout = SiteLayout::new(&EngineConfig::new(dir.path()));
        fs::create_dir_all(layout.addon_path("demo")).unwrap();

        let report = ConflictDetector::new(&layout, "index")
            .check(&descriptor(PackageKind::Addon, "demo"), PackageKind::Addon, is_upgrade, force)
            .unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn force_does_not_bypass_existing_addon() {
        let dir = tempdir().unwrap();
        let layout = SiteLayout::new(&EngineConfig::new(dir.path()));
        fs::create_dir_all(layout.addon_path("demo")).unwrap();

        let report = ConflictDetector::new(&layout, "index")
            .check(&descriptor(PackageKind::Addon, "demo"), PackageKind::Addon, false, true)
            .unwrap();
        assert_eq!(report.entries.len(), 1);
    }

    #[test]
    fn dotted_directories_are_not_addons() {
        let dir = tempdir().unwrap();
        let layout = SiteLayout::new(&EngineConfig::new(dir.path()));
        fs::create_dir_all(layout.addons_dir().join("demo.bak")).unwrap();

        let report = ConflictDetector::new(&layout, "index")
            .check(&descriptor(PackageKind::Addon, "demo"), PackageKind::Addon, false, false)
            .unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn template_requires_module_directories() {
        let dir = tempdir().unwrap();
        let layout = SiteLayout::new(&EngineConfig::new(dir.path()));
        let detector = ConflictDetector::new(&layout, "index");
        let dark = descriptor(PackageKind::Template, "dark");

        let report = detector.check(&dark, PackageKind::Template, false, false).unwrap();
        assert_eq!(
            report
                .with_state(ConflictState::MissingWritableTarget)
                .count(),
            2
        );
        let err = detector
            .assert_installable(&dark, PackageKind::Template, false, false)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ConflictError::MissingTarget(_))));
    }

    #[rstest]
    #[case(false, false, 2)]
    #[case(false, true, 0)]
    #[case(true, false, 0)]
    fn template_occupancy(#[case] is_upgrade: bool, #[case] force: bool, #[case] expected: usize) {
        let dir = tempdir().unwrap();
        let layout = SiteLayout::new(&EngineConfig::new(dir.path()));
        fs::create_dir_all(layout.template_path("index").join("dark")).unwrap();
        fs::create_dir_all(layout.static_path("index").join("dark")).unwrap();

        let report = ConflictDetector::new(&layout, "index")
            .check(&descriptor(PackageKind::Template, "dark"), PackageKind::Template, is_upgrade, force)
            .unwrap();
        assert_eq!(report.with_state(ConflictState::AlreadyExists).count(), expected);
        assert_eq!(report.is_blocking(force), expected > 0);
    }
}
