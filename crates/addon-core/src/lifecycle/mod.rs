//! Lifecycle Orchestrator
//!
//! [`AddonManager`] sequences every operation through the same phases:
//! validate the manifest, check conflicts, stage the payload, merge it into
//! the site, run the package's hooks and finalize the registry. Install
//! failures after staging roll back everything the operation created.
//! Upgrades do not roll back; take a backup with [`crate::staging::pack`]
//! first.

mod lock;
mod phase;

pub use lock::PackageLock;
pub use phase::{Operation, OperationOutcome, Phase};

use std::path::{Path, PathBuf};

use addon_fs::PackageFile;
use addon_manifest::{PackageDescriptor, PackageKind};

use crate::config::EngineConfig;
use crate::conflict::{ConflictDetector, ConflictState, PreflightContext, PreflightReport};
use crate::error::ConflictError;
use crate::hooks::{Database, HookRegistry, MenuRegistrar, NoDatabase, NoMenus};
use crate::layout::SiteLayout;
use crate::merge::{ConflictPolicy, MergePolicy, MergeRecord, Transfer, TreeMerger};
use crate::overlay::{OverlayRecord, OverlayTracker, PayloadIndex};
use crate::registry::{
    PackageRecord, PackageRef, PackageRegistry, STATUS_DISABLED, STATUS_ENABLED, theme_setting,
};
use crate::staging::{StagingArea, list_archive};
use crate::{Error, Result};
use phase::PhaseTracker;

/// Where a package is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// Unpacked package directory; copied, never consumed
    Directory(PathBuf),
    /// Zip archive, extracted into the staging area
    Archive(PathBuf),
}

impl PackageSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(path) | Self::Archive(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Overwrite existing template and overlay files
    pub force: bool,
    /// Import `demodata.sql`; `None` uses the engine configuration
    pub demo_data: Option<bool>,
}

impl InstallOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn with_demo_data(mut self, demo_data: bool) -> Self {
        self.demo_data = Some(demo_data);
        self
    }
}

/// What an install has done so far, for rollback.
#[derive(Debug, Default)]
struct InstallProgress {
    record: MergeRecord,
    own_theme: bool,
}

/// Runs package operations against one site.
pub struct AddonManager {
    config: EngineConfig,
    layout: SiteLayout,
    registry: PackageRegistry,
    hooks: HookRegistry,
    database: Box<dyn Database>,
    menus: Box<dyn MenuRegistrar>,
    last_error: Option<String>,
    last_outcome: Option<OperationOutcome>,
}

impl std::fmt::Debug for AddonManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonManager")
            .field("root", &self.layout.root())
            .field("hooks", &self.hooks)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl AddonManager {
    pub fn new(config: EngineConfig) -> Self {
        let layout = SiteLayout::new(&config);
        let registry = PackageRegistry::open(layout.registry_path(), config.no_cache());
        Self {
            config,
            layout,
            registry,
            hooks: HookRegistry::new(),
            database: Box::new(NoDatabase),
            menus: Box::new(NoMenus),
            last_error: None,
            last_outcome: None,
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_database(mut self, database: impl Database + 'static) -> Self {
        self.database = Box::new(database);
        self
    }

    pub fn with_menus(mut self, menus: impl MenuRegistrar + 'static) -> Self {
        self.menus = Box::new(menus);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &SiteLayout {
        &self.layout
    }

    pub fn registry(&mut self) -> &mut PackageRegistry {
        &mut self.registry
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Message of the last failed operation, cleared by a success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_outcome(&self) -> Option<&OperationOutcome> {
        self.last_outcome.as_ref()
    }

    fn run<T>(
        &mut self,
        mut tracker: PhaseTracker,
        op: impl FnOnce(&mut Self, &mut PhaseTracker) -> Result<T>,
    ) -> Result<T> {
        let result = op(self, &mut tracker);
        let outcome = tracker.finish(result.as_ref().err().map(Error::kind));
        match &result {
            Ok(_) => {
                tracing::info!(operation = %outcome.operation, package = %outcome.package, "operation finished");
                self.last_error = None;
            }
            Err(e) => {
                tracing::warn!(operation = %outcome.operation, package = %outcome.package, error = %e, "operation failed");
                self.last_error = Some(e.to_string());
            }
        }
        self.last_outcome = Some(outcome);
        result
    }

    /// Install a package and enable it.
    pub fn install(
        &mut self,
        source: PackageSource,
        kind: PackageKind,
        options: InstallOptions,
    ) -> Result<PackageDescriptor> {
        let tracker = PhaseTracker::start(Operation::Install, source.path().display().to_string());
        self.run(tracker, |m, t| m.install_inner(&source, kind, options, false, t))
    }

    /// Install an uploaded, already unpacked directory.
    ///
    /// Refuses a package whose name is already registered. The directory is
    /// moved into the site, and its sibling `<dir>.zip` is removed when the
    /// configuration says so.
    pub fn install_local(
        &mut self,
        dir: &Path,
        kind: PackageKind,
        options: InstallOptions,
    ) -> Result<PackageDescriptor> {
        let tracker = PhaseTracker::start(Operation::InstallLocal, dir.display().to_string());
        let source = PackageSource::Directory(dir.to_path_buf());
        self.run(tracker, |m, t| m.install_inner(&source, kind, options, true, t))
    }

    fn install_inner(
        &mut self,
        source: &PackageSource,
        kind: PackageKind,
        options: InstallOptions,
        local: bool,
        tracker: &mut PhaseTracker,
    ) -> Result<PackageDescriptor> {
        let descriptor = read_descriptor(source, kind)?;
        let name = descriptor.name.clone();
        tracker.set_package(&name);
        if local && self.is_registered(&descriptor)? {
            return Err(Error::AlreadyInstalled(name));
        }
        let _lock = PackageLock::acquire(&self.layout.locks_dir(), &name)?;

        tracker.advance(Phase::CheckingConflicts);
        ConflictDetector::new(&self.layout, &self.config.default_module)
            .assert_installable(&descriptor, kind, false, options.force)?;
        if kind != PackageKind::Template && !options.force {
            self.assert_no_overlay_collisions(source, &name)?;
        }

        tracker.advance(Phase::Staging);
        let staging = StagingArea::new(self.layout.staging_dir());
        let staged = match source {
            PackageSource::Directory(dir) => Ok(staging.adopt(dir)),
            PackageSource::Archive(archive) => {
                staging.stage(archive, &name, &descriptor.version)
            }
        };

        let mut progress = InstallProgress::default();
        let result = staged.and_then(|mut handle| {
            let transfer = if handle.is_owned() || local {
                Transfer::Move
            } else {
                Transfer::Copy
            };
            let placed = self.place(
                &descriptor,
                kind,
                handle.path(),
                transfer,
                options,
                &mut progress,
                tracker,
            );
            handle.release();
            placed
        });

        if let Err(e) = result {
            tracker.advance(Phase::RollingBack);
            self.roll_back(&name, &progress);
            self.discard_archive(source, local);
            return Err(e);
        }
        self.discard_archive(source, local);
        Ok(descriptor)
    }

    /// Merge, hooks and finalize of an install.
    #[allow(clippy::too_many_arguments)]
    fn place(
        &mut self,
        descriptor: &PackageDescriptor,
        kind: PackageKind,
        source_dir: &Path,
        transfer: Transfer,
        options: InstallOptions,
        progress: &mut InstallProgress,
        tracker: &mut PhaseTracker,
    ) -> Result<()> {
        let name = descriptor.name.as_str();
        let conflict = if options.force {
            ConflictPolicy::Force
        } else {
            ConflictPolicy::Strict
        };

        tracker.advance(Phase::Merging);
        let package_dir = self.merge_package(
            descriptor,
            kind,
            source_dir,
            MergePolicy::new(conflict, transfer),
            &mut progress.record,
        )?;

        tracker.advance(Phase::RunningHooks);
        if kind != PackageKind::Template {
            let hooks = self.hooks.get(name);
            if let Some(menu) = hooks.and_then(|h| h.menu()) {
                self.menus
                    .register(&menu, name)
                    .map_err(|e| Error::hook(name, "menu", e))?;
            }
            match hooks {
                Some(hooks) => hooks.install().map_err(|e| Error::hook(name, "install", e))?,
                None => tracing::debug!(%name, "no hooks registered"),
            }
            import_script(
                self.database.as_mut(),
                &package_dir.join(PackageFile::InstallSql.as_str()),
            )?;
        }

        tracker.advance(Phase::Finalizing);
        if kind != PackageKind::Template {
            let overlay = OverlayTracker::new(&self.layout).enable(
                name,
                options.force,
                &mut self.registry,
                self.hooks.get(name),
                &mut progress.record,
            )?;
            progress.own_theme = overlay.own_theme.is_some();
        }
        if options.demo_data.unwrap_or(self.config.import_demo_data) {
            import_script(
                self.database.as_mut(),
                &package_dir.join(PackageFile::DemoSql.as_str()),
            )?;
        }

        let mut row = PackageRecord::from_descriptor(descriptor, STATUS_ENABLED);
        if kind == PackageKind::Template {
            row.module = Some(self.module_of(descriptor).to_string());
        }
        self.registry.upsert(row)?;
        Ok(())
    }

    /// Place the package tree. Returns the directory holding the package's
    /// own files (SQL scripts included).
    fn merge_package(
        &self,
        descriptor: &PackageDescriptor,
        kind: PackageKind,
        source_dir: &Path,
        policy: MergePolicy,
        record: &mut MergeRecord,
    ) -> Result<PathBuf> {
        let name = descriptor.name.as_str();
        match kind {
            PackageKind::Template => {
                let module = self.module_of(descriptor);
                let static_dest = self.layout.static_path(module).join(name);
                let template_dest = self.layout.template_path(module).join(name);

                let static_source = source_dir.join(PackageFile::StaticDir.as_str());
                if static_source.is_dir() && !addon_fs::io::is_dir_empty(&static_source)? {
                    TreeMerger::new(policy).merge_into(&static_source, &static_dest, record)?;
                } else {
                    crate::merge::create_dir_recorded(&static_dest, record)?;
                }
                TreeMerger::new(policy)
                    .exclude(PackageFile::StaticDir.as_str())
                    .merge_into(source_dir, &template_dest, record)?;
                Ok(template_dest)
            }
            PackageKind::Addon | PackageKind::Module => {
                let dest = self.layout.addon_path(name);
                TreeMerger::new(policy).merge_into(source_dir, &dest, record)?;
                Ok(dest)
            }
        }
    }

    fn roll_back(&mut self, name: &str, progress: &InstallProgress) {
        let removed = progress.record.rollback();
        if progress.own_theme {
            let result = self
                .registry
                .remove_templates_of(name)
                .and_then(|_| self.registry.remove_setting(&theme_setting(name)));
            if let Err(e) = result {
                tracing::warn!(%name, error = %e, "rollback could not remove bundled theme rows");
            }
        }
        tracing::debug!(%name, removed, "install rolled back");
    }

    fn discard_archive(&self, source: &PackageSource, local: bool) {
        if !self.config.remove_archive_after_install {
            return;
        }
        let archive = match source {
            PackageSource::Archive(archive) => archive.clone(),
            PackageSource::Directory(dir) if local => dir.with_extension("zip"),
            PackageSource::Directory(_) => return,
        };
        match addon_fs::io::remove_file_if_exists(&archive) {
            Ok(true) => tracing::debug!(?archive, "archive removed"),
            Ok(false) => {}
            Err(e) => tracing::warn!(?archive, error = %e, "failed to remove archive"),
        }
    }

    fn assert_no_overlay_collisions(&mut self, source: &PackageSource, name: &str) -> Result<()> {
        let payload = payload_of(source)?;
        if payload.is_empty() {
            return Ok(());
        }
        let found = OverlayTracker::new(&self.layout).enable_collisions(
            name,
            &payload,
            &mut self.registry,
        )?;
        let existing: Vec<PathBuf> = found
            .iter()
            .filter(|e| e.state == ConflictState::AlreadyExists)
            .map(|e| e.path.clone())
            .collect();
        if !existing.is_empty() {
            return Err(ConflictError::OverlayCollision(existing).into());
        }
        match found.into_iter().find(|e| e.state == ConflictState::NotWritable) {
            Some(entry) => Err(ConflictError::NotWritable(entry.path).into()),
            None => Ok(()),
        }
    }

    fn is_registered(&mut self, descriptor: &PackageDescriptor) -> Result<bool> {
        let row = match descriptor.kind {
            PackageKind::Template => {
                let module = self.module_of(descriptor).to_string();
                self.registry
                    .get(&PackageRef::template(module, descriptor.name.clone()))?
            }
            _ => self.registry.find_addon(&descriptor.name)?,
        };
        Ok(row.is_some())
    }

    fn module_of<'d>(&'d self, descriptor: &'d PackageDescriptor) -> &'d str {
        descriptor
            .module
            .as_deref()
            .unwrap_or(&self.config.default_module)
    }

    /// Replace an installed package with a newer copy.
    ///
    /// An enabled addon is disabled first and enabled again afterwards.
    /// Nothing is rolled back when a step fails.
    pub fn upgrade(
        &mut self,
        source: PackageSource,
        kind: PackageKind,
        options: InstallOptions,
    ) -> Result<PackageDescriptor> {
        let tracker = PhaseTracker::start(Operation::Upgrade, source.path().display().to_string());
        self.run(tracker, |m, t| m.upgrade_inner(&source, kind, options, t))
    }

    fn upgrade_inner(
        &mut self,
        source: &PackageSource,
        kind: PackageKind,
        options: InstallOptions,
        tracker: &mut PhaseTracker,
    ) -> Result<PackageDescriptor> {
        let descriptor = read_descriptor(source, kind)?;
        let name = descriptor.name.clone();
        tracker.set_package(&name);
        let _lock = PackageLock::acquire(&self.layout.locks_dir(), &name)?;

        tracker.advance(Phase::CheckingConflicts);
        ConflictDetector::new(&self.layout, &self.config.default_module)
            .assert_installable(&descriptor, kind, true, true)?;
        let target = match kind {
            PackageKind::Template => {
                PackageRef::template(self.module_of(&descriptor).to_string(), name.clone())
            }
            _ => PackageRef {
                kind,
                name: name.clone(),
                module: None,
            },
        };
        let mut row = self
            .registry
            .get(&target)?
            .ok_or_else(|| Error::NotInstalled(name.clone()))?;

        if kind != PackageKind::Template && row.is_enabled() {
            self.disable_inner(&target)?;
        }

        tracker.advance(Phase::Staging);
        let staging = StagingArea::new(self.layout.staging_dir());
        let mut handle = match source {
            PackageSource::Directory(dir) => staging.adopt(dir),
            PackageSource::Archive(archive) => {
                staging.stage(archive, &name, &descriptor.version)?
            }
        };
        let transfer = if handle.is_owned() {
            Transfer::Move
        } else {
            Transfer::Copy
        };

        tracker.advance(Phase::Merging);
        let mut record = MergeRecord::new();
        let merged = self.merge_package(
            &descriptor,
            kind,
            handle.path(),
            MergePolicy::force(transfer),
            &mut record,
        );
        handle.release();
        let package_dir = merged?;

        tracker.advance(Phase::RunningHooks);
        if kind != PackageKind::Template {
            if let Some(hooks) = self.hooks.get(&name).filter(|h| h.capabilities().upgrade) {
                if let Some(menu) = hooks.menu() {
                    self.menus
                        .register(&menu, &name)
                        .map_err(|e| Error::hook(&name, "menu", e))?;
                }
                hooks
                    .upgrade()
                    .map_err(|e| Error::hook(&name, "upgrade", e))?;
            }
            import_script(
                self.database.as_mut(),
                &package_dir.join(PackageFile::UpgradeSql.as_str()),
            )?;
        }

        tracker.advance(Phase::Finalizing);
        if kind != PackageKind::Template {
            self.enable_inner(&target, false, &mut MergeRecord::new())?;
        }
        if options.demo_data.unwrap_or(self.config.import_demo_data) {
            import_script(
                self.database.as_mut(),
                &package_dir.join(PackageFile::DemoSql.as_str()),
            )?;
        }

        row.refresh(&descriptor);
        if kind != PackageKind::Template {
            row.status = STATUS_ENABLED;
        }
        self.registry.upsert(row)?;
        self.discard_archive(source, false);
        Ok(descriptor)
    }

    /// Remove an installed package. Uninstalling something that is neither
    /// registered nor on disk succeeds without doing anything.
    pub fn uninstall(&mut self, target: &PackageRef) -> Result<()> {
        let tracker = PhaseTracker::start(Operation::Uninstall, target.name.clone());
        self.run(tracker, |m, t| m.uninstall_inner(target, t))
    }

    fn uninstall_inner(&mut self, target: &PackageRef, tracker: &mut PhaseTracker) -> Result<()> {
        validate_target(target)?;
        let name = target.name.as_str();
        let _lock = PackageLock::acquire(&self.layout.locks_dir(), name)?;
        let row = match target.kind {
            PackageKind::Template => self.registry.get(target)?,
            _ => self.registry.find_addon(name)?,
        };

        let dirs = match target.kind {
            PackageKind::Template => {
                let module = target
                    .module
                    .as_deref()
                    .unwrap_or(&self.config.default_module);
                vec![
                    self.layout.template_path(module).join(name),
                    self.layout.static_path(module).join(name),
                ]
            }
            _ => vec![self.layout.addon_path(name)],
        };
        if row.is_none() && !dirs.iter().any(|d| d.exists()) {
            tracing::info!(%name, "not installed, nothing to uninstall");
            return Ok(());
        }

        if let Some(enabled) = row
            .as_ref()
            .filter(|r| r.kind != PackageKind::Template && r.is_enabled())
        {
            self.disable_inner(&PackageRef::of_record(enabled))?;
        }

        tracker.advance(Phase::RunningHooks);
        if target.kind != PackageKind::Template {
            if let Some(hooks) = self.hooks.get(name) {
                hooks
                    .uninstall()
                    .map_err(|e| Error::hook(name, "uninstall", e))?;
            }
        }
        import_script(
            self.database.as_mut(),
            &dirs[0].join(PackageFile::UnDemoSql.as_str()),
        )?;

        tracker.advance(Phase::Finalizing);
        for dir in &dirs {
            addon_fs::io::remove_dir_all_if_exists(dir)?;
        }
        if let Some(row) = row {
            self.registry.remove(&PackageRef::of_record(&row))?;
        }
        Ok(())
    }

    /// Apply the overlay of an installed addon and mark it enabled.
    ///
    /// An addon already enabled is left alone unless `force` is set. A
    /// category refused for conflicts copies nothing, but categories copied
    /// before it stay in place.
    pub fn enable(&mut self, name: &str, force: bool) -> Result<OverlayRecord> {
        let tracker = PhaseTracker::start(Operation::Enable, name);
        self.run(tracker, |m, t| {
            validate_target(&PackageRef::addon(name))?;
            let _lock = PackageLock::acquire(&m.layout.locks_dir(), name)?;
            let row = m.installed_addon(name)?;
            if row.is_enabled() && !force {
                tracing::debug!(%name, "already enabled");
                return Ok(OverlayRecord::default());
            }
            let target = PackageRef::of_record(&row);
            t.advance(Phase::Merging);
            m.enable_inner(&target, force, &mut MergeRecord::new())
        })
    }

    /// Remove the overlay of an installed addon and mark it disabled.
    pub fn disable(&mut self, name: &str) -> Result<OverlayRecord> {
        let tracker = PhaseTracker::start(Operation::Disable, name);
        self.run(tracker, |m, t| {
            validate_target(&PackageRef::addon(name))?;
            let _lock = PackageLock::acquire(&m.layout.locks_dir(), name)?;
            let target = PackageRef::of_record(&m.installed_addon(name)?);
            t.advance(Phase::Finalizing);
            m.disable_inner(&target)
        })
    }

    fn installed_addon(&mut self, name: &str) -> Result<PackageRecord> {
        self.registry
            .find_addon(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))
    }

    fn enable_inner(
        &mut self,
        target: &PackageRef,
        force: bool,
        record: &mut MergeRecord,
    ) -> Result<OverlayRecord> {
        let overlay = OverlayTracker::new(&self.layout).enable(
            &target.name,
            force,
            &mut self.registry,
            self.hooks.get(&target.name),
            record,
        )?;
        self.registry.set_status(target, STATUS_ENABLED)?;
        Ok(overlay)
    }

    fn disable_inner(&mut self, target: &PackageRef) -> Result<OverlayRecord> {
        let overlay = OverlayTracker::new(&self.layout).disable(
            &target.name,
            &mut self.registry,
            self.hooks.get(&target.name),
        )?;
        self.registry.set_status(target, STATUS_DISABLED)?;
        Ok(overlay)
    }

    /// Report dependencies, tables, directories and conflicts of a package
    /// without changing anything.
    pub fn preflight(&mut self, source: &PackageSource, kind: PackageKind) -> Result<PreflightReport> {
        let descriptor = read_descriptor(source, kind)?;
        let payload = payload_of(source)?;
        let demo_data = match source {
            PackageSource::Directory(dir) => dir.join(PackageFile::DemoSql.as_str()).is_file(),
            PackageSource::Archive(archive) => list_archive(archive)?
                .iter()
                .any(|p| p.as_str() == PackageFile::DemoSql.as_str()),
        };
        ConflictDetector::new(&self.layout, &self.config.default_module).preflight(
            &descriptor,
            kind,
            PreflightContext {
                registry: &mut self.registry,
                database: self.database.as_ref(),
                payload: &payload,
                demo_data,
            },
        )
    }
}

/// Refuse names that are not package identifiers before they are joined
/// onto site paths.
fn validate_target(target: &PackageRef) -> Result<()> {
    let names = std::iter::once(target.name.as_str()).chain(target.module.as_deref());
    for name in names {
        if !addon_fs::is_identifier(name) {
            return Err(addon_manifest::Error::InvalidName(name.to_string()).into());
        }
    }
    Ok(())
}

fn read_descriptor(source: &PackageSource, kind: PackageKind) -> Result<PackageDescriptor> {
    let descriptor = match source {
        PackageSource::Directory(dir) => addon_manifest::read(dir, kind)?,
        PackageSource::Archive(archive) => addon_manifest::read_archive(archive, kind)?,
    };
    Ok(descriptor)
}

fn payload_of(source: &PackageSource) -> Result<PayloadIndex> {
    match source {
        PackageSource::Directory(dir) => {
            PayloadIndex::from_install_dir(&dir.join(PackageFile::InstallDir.as_str()))
        }
        PackageSource::Archive(archive) => {
            Ok(PayloadIndex::from_package_entries(list_archive(archive)?))
        }
    }
}

/// Run `script` if the package ships it. Returns whether it ran.
fn import_script(database: &mut dyn Database, script: &Path) -> Result<bool> {
    if !script.is_file() {
        return Ok(false);
    }
    database
        .import(script)
        .map_err(|e| Error::import(script, e))?;
    tracing::debug!(?script, "imported sql script");
    Ok(true)
}
