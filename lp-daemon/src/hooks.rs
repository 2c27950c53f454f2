//! Plugin hook dispatch
//!
//! Every hook runs on the blocking pool under a timeout. A hook that errors,
//! panics or overruns is logged and the dispatch moves on to the next plugin;
//! an overrunning hook is abandoned, not cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, error, info};

use lp_core::{merge_settings, HardwarePlugin, PluginRegistry};
use lp_protocol::{HwConfig, PtpProfile};

/// Outcome of one blocking hook invocation
enum HookOutcome<T> {
    Done(T),
    Failed(String),
}

async fn run_bounded<T, F>(limit: Duration, plugin: &str, hook: &str, f: F) -> HookOutcome<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => HookOutcome::Done(value),
        Ok(Err(e)) => HookOutcome::Failed(describe_join_error(&e)),
        Err(_) => {
            error!(plugin = %plugin, hook = %hook, timeout = ?limit, "Plugin hook timed out");
            HookOutcome::Failed("timed out".to_string())
        }
    }
}

fn describe_join_error(e: &JoinError) -> String {
    if e.is_panic() {
        "panicked".to_string()
    } else {
        format!("cancelled: {}", e)
    }
}

pub struct HookDispatcher {
    plugins: PluginRegistry,
    timeout: Duration,
}

impl HookDispatcher {
    pub fn new(plugins: PluginRegistry, timeout: Duration) -> Self {
        Self { plugins, timeout }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Plugins whose option block the profile carries, in name order
    fn configured<'a>(&'a self, profile: &'a PtpProfile) -> impl Iterator<Item = Arc<dyn HardwarePlugin>> + 'a {
        self.plugins
            .iter()
            .filter(move |p| profile.plugin_options(p.name()).is_some())
            .cloned()
    }

    /// Run `OnConfigChange` for every configured plugin.
    ///
    /// Each plugin works on its own copy of the profile; settings it derives
    /// are merged back without replacing keys already present.
    pub async fn on_config_change(&self, profile: &mut PtpProfile) {
        let plugins: Vec<_> = self.configured(profile).collect();
        for plugin in plugins {
            let name = plugin.name().to_string();
            let mut working = profile.clone();
            let task = move || {
                let result = plugin.on_config_change(&mut working);
                (result, working)
            };

            match run_bounded(self.timeout, &name, "OnConfigChange", task).await {
                HookOutcome::Done((Ok(()), updated)) => {
                    let added = merge_settings(&mut profile.ptp_settings, &updated.ptp_settings);
                    info!(plugin = %name, added = added.len(), "OnConfigChange complete");
                }
                HookOutcome::Done((Err(e), _)) => {
                    error!(plugin = %name, hook = "OnConfigChange", error = %e, "Plugin hook failed");
                }
                HookOutcome::Failed(reason) => {
                    error!(plugin = %name, hook = "OnConfigChange", reason = %reason, "Plugin hook failed");
                }
            }
        }
    }

    /// Run `AfterRunCommand` for every configured plugin
    pub async fn after_run_command(&self, profile: Arc<PtpProfile>, command: &str) {
        let plugins: Vec<_> = self.configured(&profile).collect();
        for plugin in plugins {
            let name = plugin.name().to_string();
            let profile = Arc::clone(&profile);
            let cmd = command.to_string();
            let task = move || plugin.after_run_command(&profile, &cmd);

            match run_bounded(self.timeout, &name, "AfterRunCommand", task).await {
                HookOutcome::Done(Ok(())) => {
                    debug!(plugin = %name, command = %command, "AfterRunCommand complete");
                }
                HookOutcome::Done(Err(e)) => {
                    error!(plugin = %name, hook = "AfterRunCommand", command = %command, error = %e, "Plugin hook failed");
                }
                HookOutcome::Failed(reason) => {
                    error!(plugin = %name, hook = "AfterRunCommand", command = %command, reason = %reason, "Plugin hook failed");
                }
            }
        }
    }

    /// Gather hardware-status records from all registered plugins
    pub async fn populate_hardware_status(&self) -> Vec<HwConfig> {
        let plugins = self.plugins.clone();
        match run_bounded(self.timeout, "*", "PopulateHardwareStatus", move || {
            plugins.populate_hardware_status()
        })
        .await
        {
            HookOutcome::Done(records) => records,
            HookOutcome::Failed(reason) => {
                error!(hook = "PopulateHardwareStatus", reason = %reason, "Plugin hook failed");
                Vec::new()
            }
        }
    }
}
