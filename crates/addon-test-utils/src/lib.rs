//! Shared test fixtures for the addon-deploy workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`site`]: [`TestSite`], a temporary site root with assertion helpers
//!   and tree snapshots
//! - [`package`]: [`PackageBuilder`] for package directories and zip archives

pub mod package;
pub mod site;

pub use package::PackageBuilder;
pub use site::{Snapshot, TestSite};
