//! Integration tests for the pre-install report.

mod common;

use addon_core::{
    AddonManager, ConflictState, EngineConfig, HookRegistry, InstallOptions, PackageSource,
};
use addon_manifest::PackageKind;
use addon_test_utils::{PackageBuilder, TestSite};
use common::{CallLog, RecordingDatabase};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn demo() -> PackageBuilder {
    PackageBuilder::addon("demo")
        .manifest_line("addon[blog] = 2.0")
        .manifest_line("addon[shop] = 1.0.0")
        .manifest_line("database = demo_log,demo_user")
        .manifest_line("dir = app,uploads")
        .file("demodata.sql", "INSERT 1;")
        .install_file("app/demo.php", "x")
}

#[test]
fn test_preflight_reports_everything() {
    let site = TestSite::new();
    site.write("app/demo.php", "existing");
    let upload = TempDir::new().unwrap();
    let log = CallLog::default();
    let mut manager = AddonManager::new(EngineConfig::new(site.root()))
        .with_hooks(HookRegistry::new())
        .with_database(RecordingDatabase::new(&log).with_tables(&["cms_demo_log"]));

    let shop = PackageBuilder::addon_version("shop", "1.2.0");
    manager
        .install(
            PackageSource::Directory(shop.write_dir(upload.path())),
            PackageKind::Addon,
            InstallOptions::default(),
        )
        .unwrap();
    let before = site.snapshot("");

    let source = PackageSource::Directory(demo().write_dir(upload.path()));
    let report = manager.preflight(&source, PackageKind::Addon).unwrap();

    let deps: Vec<(&str, Option<&str>, Option<bool>)> = report
        .dependencies
        .iter()
        .map(|d| (d.name.as_str(), d.installed.as_deref(), d.satisfied))
        .collect();
    assert_eq!(
        deps,
        vec![("blog", None, None), ("shop", Some("1.2.0"), Some(true))]
    );
    assert!(report.dependencies[1].enabled);

    let tables: Vec<(&str, bool)> = report
        .tables
        .iter()
        .map(|t| (t.table.as_str(), t.exists))
        .collect();
    assert_eq!(tables, vec![("cms_demo_log", true), ("cms_demo_user", false)]);

    let dirs: Vec<(std::path::PathBuf, bool)> = report
        .dirs
        .iter()
        .map(|d| (d.path.clone(), d.writable))
        .collect();
    assert_eq!(
        dirs,
        vec![
            (site.path("app"), true),
            (site.path("uploads"), false),
            (site.path("addons"), true),
        ]
    );

    assert!(report.demo_data);
    let existing: Vec<_> = report
        .conflicts
        .with_state(ConflictState::AlreadyExists)
        .map(|e| e.path.clone())
        .collect();
    assert_eq!(existing, vec![site.path("app/demo.php")]);
    assert!(!report.is_ready(false));

    assert_eq!(before, site.snapshot(""));
    assert!(log.calls().is_empty());
}

#[test]
fn test_preflight_reads_archives() {
    let site = TestSite::new();
    let upload = TempDir::new().unwrap();
    let mut manager = AddonManager::new(EngineConfig::new(site.root()));

    let archive = PackageBuilder::addon("demo")
        .file("demodata.sql", "INSERT 1;")
        .write_zip(&upload.path().join("demo.zip"));
    let report = manager
        .preflight(&PackageSource::Archive(archive.clone()), PackageKind::Addon)
        .unwrap();
    assert!(report.demo_data);
    assert!(report.is_ready(false));
    assert!(archive.exists());
}
