//! Recording collaborators shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use addon_core::{
    AddonHooks, AddonManager, Capabilities, CollaboratorError, Database, EngineConfig,
    HookRegistry, HookResult, MenuItem, MenuRegistrar,
};
use addon_test_utils::TestSite;

/// Ordered log of every collaborator call.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct RecordingHooks {
    log: CallLog,
    capabilities: Capabilities,
    fail_on: Option<&'static str>,
    menu: Option<Vec<MenuItem>>,
}

impl RecordingHooks {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            capabilities: Capabilities::NONE,
            fail_on: None,
            menu: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn failing(mut self, hook: &'static str) -> Self {
        self.fail_on = Some(hook);
        self
    }

    pub fn with_menu(mut self, menu: Vec<MenuItem>) -> Self {
        self.menu = Some(menu);
        self
    }

    fn call(&self, hook: &'static str) -> HookResult {
        self.log.push(hook);
        if self.fail_on == Some(hook) {
            return Err(format!("{hook} exploded").into());
        }
        Ok(())
    }
}

impl AddonHooks for RecordingHooks {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn menu(&self) -> Option<Vec<MenuItem>> {
        self.menu.clone()
    }

    fn install(&self) -> HookResult {
        self.call("install")
    }

    fn uninstall(&self) -> HookResult {
        self.call("uninstall")
    }

    fn upgrade(&self) -> HookResult {
        self.call("upgrade")
    }

    fn enable(&self) -> HookResult {
        self.call("enable")
    }

    fn disable(&self) -> HookResult {
        self.call("disable")
    }
}

/// Logs `sql:<file name>` for every imported script.
pub struct RecordingDatabase {
    log: CallLog,
    tables: Vec<String>,
    prefix: String,
}

impl RecordingDatabase {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            tables: Vec::new(),
            prefix: "cms_".into(),
        }
    }

    pub fn with_tables(mut self, tables: &[&str]) -> Self {
        self.tables = tables.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl Database for RecordingDatabase {
    fn import(&mut self, script: &Path) -> HookResult {
        let name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.log.push(format!("sql:{name}"));
        Ok(())
    }

    fn tables(&self) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.tables.clone())
    }

    fn table_prefix(&self) -> &str {
        &self.prefix
    }
}

/// Logs `menu:<package>:<entries>`.
pub struct RecordingMenus {
    log: CallLog,
}

impl RecordingMenus {
    pub fn new(log: &CallLog) -> Self {
        Self { log: log.clone() }
    }
}

impl MenuRegistrar for RecordingMenus {
    fn register(&mut self, menu: &[MenuItem], package: &str) -> HookResult {
        self.log.push(format!("menu:{package}:{}", menu.len()));
        Ok(())
    }
}

/// Manager for `site` with recording collaborators sharing `log`.
pub fn manager(site: &TestSite, log: &CallLog, hooks: HookRegistry) -> AddonManager {
    AddonManager::new(EngineConfig::new(site.root()))
        .with_hooks(hooks)
        .with_database(RecordingDatabase::new(log))
        .with_menus(RecordingMenus::new(log))
}

/// Hook registry holding recording hooks for `name`.
pub fn hooks_for(name: &str, hooks: RecordingHooks) -> HookRegistry {
    let mut registry = HookRegistry::new();
    registry.register(name, hooks);
    registry
}
