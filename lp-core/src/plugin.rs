//! Hardware plugin contract and registry
//!
//! Vendor plugins implement [`HardwarePlugin`]; every hook has a no-op
//! default so a plugin only overrides the hooks it cares about. Private state
//! (accumulated status strings and the like) lives inside the concrete plugin
//! type; the registry sees only the trait object.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use lp_protocol::{HwConfig, PtpProfile};

use crate::{PtpError, Result};

/// Hooks a vendor plugin may implement
pub trait HardwarePlugin: Send + Sync {
    /// Registry key; also the profile's option block key
    fn name(&self) -> &str;

    /// Called once per configuration reload when the profile carries this
    /// plugin's option block. May add derived entries to `ptp_settings`.
    fn on_config_change(&self, _profile: &mut PtpProfile) -> Result<()> {
        Ok(())
    }

    /// Called after the supervisor launches `command`
    fn after_run_command(&self, _profile: &PtpProfile, _command: &str) -> Result<()> {
        Ok(())
    }

    /// Append this plugin's hardware-status records to `out`
    fn populate_hardware_status(&self, _out: &mut Vec<HwConfig>) -> Result<()> {
        Ok(())
    }
}

/// Name-keyed plugin collection, built once at startup
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn HardwarePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin; an existing entry under the same name is kept.
    ///
    /// # Errors
    ///
    /// Returns [`PtpError::DuplicatePlugin`] when the name is taken.
    pub fn register(&mut self, plugin: Arc<dyn HardwarePlugin>) -> Result<()> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PtpError::DuplicatePlugin(name));
        }
        info!(plugin = %name, "Registered plugin");
        self.plugins.insert(name, plugin);
        Ok(())
    }

    /// Build a registry by calling `factory` once per configured name.
    ///
    /// Duplicate and unknown names are logged and skipped.
    pub fn from_factory<F>(names: &[String], factory: F) -> Self
    where
        F: Fn(&str) -> Option<Arc<dyn HardwarePlugin>>,
    {
        let mut registry = Self::new();
        for name in names {
            if registry.contains(name) {
                warn!(plugin = %name, "{}", PtpError::DuplicatePlugin(name.clone()));
                continue;
            }
            let Some(plugin) = factory(name) else {
                warn!(plugin = %name, "{}", PtpError::UnknownPlugin(name.clone()));
                continue;
            };
            if let Err(e) = registry.register(plugin) {
                warn!(plugin = %name, error = %e, "Skipping plugin");
            }
        }
        registry
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HardwarePlugin>> {
        self.plugins.get(name).cloned()
    }

    /// Registered plugin names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    /// Plugins in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn HardwarePlugin>> {
        self.plugins.values()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Gather hardware-status records from every plugin.
    ///
    /// A failing plugin is logged and contributes nothing.
    pub fn populate_hardware_status(&self) -> Vec<HwConfig> {
        let mut out = Vec::new();
        for (name, plugin) in &self.plugins {
            let mut records = Vec::new();
            match plugin.populate_hardware_status(&mut records) {
                Ok(()) => out.extend(records),
                Err(e) => error!(plugin = %name, error = %e, "PopulateHardwareStatus failed"),
            }
        }
        out
    }
}

/// Merge plugin-derived settings into `target`; keys already set win.
///
/// Returns the keys that were added.
pub fn merge_settings(target: &mut BTreeMap<String, String>, derived: &BTreeMap<String, String>) -> Vec<String> {
    let mut added = Vec::new();
    for (key, value) in derived {
        if !target.contains_key(key) {
            target.insert(key.clone(), value.clone());
            added.push(key.clone());
        }
    }
    added
}
