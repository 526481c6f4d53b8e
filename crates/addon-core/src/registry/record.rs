//! Registry rows
//!
//! A record is the persisted summary of one installed package. Identity is
//! the pair of kind and name, plus the owning module for templates.

use addon_manifest::{PackageDescriptor, PackageKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status value of an enabled package.
pub const STATUS_ENABLED: i64 = 1;
/// Status value of a disabled package.
pub const STATUS_DISABLED: i64 = 0;

/// Reference to one package, used to look rows up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    pub kind: PackageKind,
    pub name: String,
    /// Owning module, templates only
    pub module: Option<String>,
}

impl PackageRef {
    pub fn addon(name: impl Into<String>) -> Self {
        Self {
            kind: PackageKind::Addon,
            name: name.into(),
            module: None,
        }
    }

    pub fn module(name: impl Into<String>) -> Self {
        Self {
            kind: PackageKind::Module,
            name: name.into(),
            module: None,
        }
    }

    pub fn template(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: PackageKind::Template,
            name: name.into(),
            module: Some(module.into()),
        }
    }

    pub fn of(descriptor: &PackageDescriptor) -> Self {
        Self {
            kind: descriptor.kind,
            name: descriptor.name.clone(),
            module: match descriptor.kind {
                PackageKind::Template => descriptor.module.clone(),
                _ => None,
            },
        }
    }

    /// Identity of an existing row.
    pub fn of_record(record: &PackageRecord) -> Self {
        Self {
            kind: record.kind,
            name: record.name.clone(),
            module: record.module.clone(),
        }
    }
}

/// One persisted registry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub kind: PackageKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub author: String,
    pub version: String,
    pub status: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub installed_at: DateTime<Utc>,
    /// Package settings, persisted as given
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl PackageRecord {
    /// Build a row from a validated descriptor.
    ///
    /// The `[config]` section of the manifest, when present, seeds `config`.
    pub fn from_descriptor(descriptor: &PackageDescriptor, status: i64) -> Self {
        let config = descriptor
            .extra
            .get("config")
            .and_then(|v| v.as_table())
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(k, v)| v.as_text().map(|v| (k.to_string(), v)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            title: descriptor.title.clone(),
            description: descriptor.description.clone(),
            author: descriptor.author.clone(),
            version: descriptor.version.clone(),
            status,
            module: descriptor.module.clone(),
            installed_at: Utc::now(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }

    /// Whether this row is the package `target` refers to.
    pub fn matches(&self, target: &PackageRef) -> bool {
        if self.kind != target.kind || self.name != target.name {
            return false;
        }
        match self.kind {
            PackageKind::Template => self.module == target.module,
            _ => true,
        }
    }

    /// Refresh metadata from a newer descriptor, keeping install time and
    /// settings.
    pub fn refresh(&mut self, descriptor: &PackageDescriptor) {
        self.title = descriptor.title.clone();
        self.description = descriptor.description.clone();
        self.author = descriptor.author.clone();
        self.version = descriptor.version.clone();
    }
}
