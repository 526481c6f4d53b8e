//! Collaborator seams
//!
//! The engine never runs package code, SQL or menu persistence itself. It
//! reaches them through the traits here: [`AddonHooks`] for package
//! callbacks, looked up by name in a [`HookRegistry`], [`Database`] for
//! schema scripts and table listings, and [`MenuRegistrar`] for admin
//! menus.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Error returned by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for CollaboratorError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CollaboratorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Result of a collaborator call.
pub type HookResult = std::result::Result<(), CollaboratorError>;

/// Optional callbacks a package implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub upgrade: bool,
    pub enable: bool,
    pub disable: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        upgrade: false,
        enable: false,
        disable: false,
    };

    pub const ALL: Self = Self {
        upgrade: true,
        enable: true,
        disable: true,
    };
}

/// One admin menu entry declared by a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_menu: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuItem>,
}

/// Package lifecycle callbacks.
///
/// `install` and `uninstall` are always called. The optional callbacks run
/// only when [`capabilities`](AddonHooks::capabilities) declares them.
pub trait AddonHooks {
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    /// Menu registered on install and upgrade.
    fn menu(&self) -> Option<Vec<MenuItem>> {
        None
    }

    fn install(&self) -> HookResult;

    fn uninstall(&self) -> HookResult;

    fn upgrade(&self) -> HookResult {
        Ok(())
    }

    fn enable(&self) -> HookResult {
        Ok(())
    }

    fn disable(&self) -> HookResult {
        Ok(())
    }
}

/// Hooks keyed by package name.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Box<dyn AddonHooks>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hooks for a package, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, hooks: impl AddonHooks + 'static) {
        self.hooks.insert(name.into(), Box::new(hooks));
    }

    pub fn get(&self, name: &str) -> Option<&dyn AddonHooks> {
        self.hooks.get(name).map(|h| h.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.hooks.keys().collect();
        names.sort();
        f.debug_struct("HookRegistry").field("packages", &names).finish()
    }
}

/// SQL collaborator.
pub trait Database {
    /// Execute a script file (`install.sql`, `upgrade.sql`, ...).
    fn import(&mut self, script: &Path) -> HookResult;

    /// Names of existing tables, prefix included.
    fn tables(&self) -> std::result::Result<Vec<String>, CollaboratorError>;

    /// Prefix applied to the bare table names packages declare.
    fn table_prefix(&self) -> &str;
}

/// Admin menu collaborator.
pub trait MenuRegistrar {
    fn register(&mut self, menu: &[MenuItem], package: &str) -> HookResult;
}

/// Database that accepts every script and has no tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDatabase;

impl Database for NoDatabase {
    fn import(&mut self, script: &Path) -> HookResult {
        tracing::debug!(?script, "no database configured, skipping import");
        Ok(())
    }

    fn tables(&self) -> std::result::Result<Vec<String>, CollaboratorError> {
        Ok(Vec::new())
    }

    fn table_prefix(&self) -> &str {
        ""
    }
}

/// Registrar that discards menus.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMenus;

impl MenuRegistrar for NoMenus {
    fn register(&mut self, _menu: &[MenuItem], package: &str) -> HookResult {
        tracing::debug!(%package, "no menu registrar configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    impl AddonHooks for Minimal {
        fn install(&self) -> HookResult {
            Ok(())
        }

        fn uninstall(&self) -> HookResult {
            Err("cannot uninstall".into())
        }
    }

    #[test]
    fn defaults_declare_no_capabilities() {
        let hooks = Minimal;
        assert_eq!(hooks.capabilities(), Capabilities::NONE);
        assert!(hooks.menu().is_none());
        assert!(hooks.enable().is_ok());
    }

    #[test]
    fn registry_lookup_by_name() {
        let mut registry = HookRegistry::new();
        registry.register("demo", Minimal);

        assert!(registry.contains("demo"));
        assert!(registry.get("other").is_none());
        let err = registry.get("demo").unwrap().uninstall().unwrap_err();
        assert_eq!(err.to_string(), "cannot uninstall");
    }
}
