//! Deployment engine for CMS addons, modules and templates
//!
//! This crate turns a package (a directory or zip archive with an
//! `info.ini` manifest) into an installed, enabled part of a site, and
//! reverses that again:
//!
//! - **Conflict Detector**: refuses placements that would clobber existing
//!   packages or hit unwritable directories
//! - **Tree Merger**: moves or copies a tree into place, recording every path
//!   it creates so a failed install can be undone
//! - **Staging Area Manager**: extracts archives into a scratch directory
//! - **Install-Manifest Tracker**: overlays an addon's `install/` tree onto the
//!   shared site directories on enable and removes it on disable
//! - **Lifecycle Orchestrator**: [`AddonManager`] runs install, upgrade,
//!   uninstall, enable and disable through a phase state machine
//!
//! # Architecture
//!
//! ```text
//!                 AddonManager
//!                      |
//!   +--------+---------+--------+---------+
//!   |        |         |        |         |
//! conflict  staging   merge   overlay  registry
//!                      |
//!          addon-manifest    addon-fs
//! ```
//!
//! # Example
//!
//! ```ignore
//! use addon_core::{AddonManager, EngineConfig, InstallOptions, PackageSource};
//! use addon_manifest::PackageKind;
//!
//! let mut manager = AddonManager::new(EngineConfig::new("/var/www/site"));
//! manager.install(
//!     PackageSource::Archive("/tmp/demo.zip".into()),
//!     PackageKind::Addon,
//!     InstallOptions::default(),
//! )?;
//! ```

pub mod config;
pub mod conflict;
pub mod error;
pub mod hooks;
pub mod layout;
pub mod lifecycle;
pub mod logging;
pub mod merge;
pub mod overlay;
pub mod registry;
pub mod staging;

pub use config::{DirectoryNames, EngineConfig};
pub use conflict::{
    ConflictDetector, ConflictEntry, ConflictReport, ConflictState, DependencyStatus, DirStatus,
    PreflightContext, PreflightReport, TableStatus,
};
pub use error::{ConflictError, Error, ErrorKind, Result};
pub use hooks::{
    AddonHooks, Capabilities, CollaboratorError, Database, HookRegistry, HookResult, MenuItem,
    MenuRegistrar, NoDatabase, NoMenus,
};
pub use layout::SiteLayout;
pub use lifecycle::{
    AddonManager, InstallOptions, Operation, OperationOutcome, PackageLock, PackageSource, Phase,
};
pub use merge::{
    ConflictPolicy, InstallPlan, MergePolicy, MergeRecord, PlacedFile, PlannedEntry, Transfer,
    TreeMerger,
};
pub use overlay::{OverlayCategory, OverlayRecord, OverlayRoot, OverlayTracker, PayloadIndex};
pub use registry::{
    PackageRecord, PackageRef, PackageRegistry, RegistryFile, STATUS_DISABLED, STATUS_ENABLED,
    theme_setting,
};
pub use staging::{StagingArea, StagingHandle, list_archive, pack, staging_key};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn conflict_error_displays_existing_name() {
        let error = Error::from(ConflictError::Exists("demo".into()));
        assert_eq!(error.to_string(), "demo existed");
        assert_eq!(error.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn overlay_conflict_lists_paths() {
        let error = Error::OverlayConflict {
            category: "app",
            paths: vec![PathBuf::from("/a"), PathBuf::from("/b")],
        };
        assert_eq!(error.to_string(), "app: /a,/b existed");
        assert_eq!(error.kind(), ErrorKind::OverlayConflict);
    }

    #[test]
    fn manifest_errors_keep_their_kind() {
        let error = Error::from(addon_manifest::Error::ManifestMissing(PathBuf::from("x")));
        assert_eq!(error.kind(), ErrorKind::ManifestMissing);
    }
}
