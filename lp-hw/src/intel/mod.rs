//! Intel E810 plugin
//!
//! On configuration change: optional default connector setup, per-device pin
//! routing, clock identity export and DPLL settings. After `gpspipe` starts:
//! u-blox receiver configuration through ubxtool, with selected output kept
//! as hardware status.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use lp_core::constants::settings;
use lp_core::{ClockIdResolver, ClockIdentity, ConfigSpaceSource, HardwarePlugin};
use lp_error::{PtpError, Result};
use lp_protocol::{HwConfig, PtpProfile};

use crate::constants::{self as hw_const, default_pins};
use crate::sysfs::SysfsNet;
use crate::tools::ToolRunner;

// ============================================================================
// Options
// ============================================================================

/// One ubxtool invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UblxCmd {
    /// Keep the tool output as hardware status
    #[serde(default)]
    pub report_output: bool,
    #[serde(default)]
    pub args: Vec<String>,
}

/// The profile's `e810` option block
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct E810Opts {
    #[serde(default)]
    pub enable_default_config: bool,
    #[serde(default)]
    pub ublx_cmds: Vec<UblxCmd>,
    /// device -> pin -> value
    #[serde(default, rename = "pins")]
    pub device_pins: BTreeMap<String, BTreeMap<String, String>>,
    /// DPLL settings exported into `ptpSettings` when not already present
    #[serde(default, rename = "settings")]
    pub dpll_settings: BTreeMap<String, u64>,
    /// interface -> property -> value
    #[serde(default)]
    pub phase_offset_pins: BTreeMap<String, BTreeMap<String, String>>,
}

impl E810Opts {
    /// Options from the profile, or `None` when the profile has no `e810` block
    pub fn from_profile(profile: &PtpProfile) -> Result<Option<Self>> {
        let Some(value) = profile.plugin_options(hw_const::E810_PLUGIN_NAME) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| PtpError::plugin(hw_const::E810_PLUGIN_NAME, format!("invalid options: {}", e)))
    }

    /// Configured commands followed by the defaults
    pub fn ublx_commands(&self) -> Vec<UblxCmd> {
        let mut cmds = self.ublx_cmds.clone();
        cmds.extend(hw_const::DEFAULT_UBLX_CMDS.iter().map(|args| UblxCmd {
            report_output: false,
            args: args.iter().map(|a| a.to_string()).collect(),
        }));
        cmds
    }
}

// ============================================================================
// Plugin
// ============================================================================

pub struct E810Plugin {
    sysfs: SysfsNet,
    resolver: ClockIdResolver,
    tools: Arc<dyn ToolRunner>,
    ubxtool: String,
    /// Recorded ubxtool output, reported by every status export
    statuses: Mutex<Vec<String>>,
}

impl E810Plugin {
    pub fn new(sysfs: SysfsNet, tools: Arc<dyn ToolRunner>) -> Self {
        let source: Arc<dyn ConfigSpaceSource> = Arc::new(sysfs.clone());
        Self {
            sysfs,
            resolver: ClockIdResolver::new(source),
            tools,
            ubxtool: hw_const::UBXTOOL_PATH.to_string(),
            statuses: Mutex::new(Vec::new()),
        }
    }

    /// Statuses recorded so far
    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().clone()
    }

    fn clock_identity(&self, profile: &PtpProfile, device: &str) -> ClockIdentity {
        if profile.is_unit_test() {
            return ClockIdentity(rand::random::<u64>());
        }
        self.resolver.resolve(device)
    }

    /// Disable SMA and U.FL connectors on every E810 device that has them
    fn apply_default_config(&self) {
        let devices = match self.sysfs.list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "Failed to list network devices");
                return;
            }
        };

        for device in devices {
            let is_e810 = self
                .sysfs
                .subsystem_device(&device)
                .map(|id| hw_const::E810_SUBSYSTEM_IDS.iter().any(|s| id.contains(s)))
                .unwrap_or(false);
            if !is_e810 {
                continue;
            }

            let phcs = match self.sysfs.list_phcs(&device) {
                Ok(phcs) => phcs,
                Err(e) => {
                    debug!(device = %device, error = %e, "No PHCs");
                    continue;
                }
            };
            for phc in phcs {
                if !self.sysfs.has_pin(&device, &phc, default_pins::GUARD_PIN) {
                    continue;
                }
                for (pin, value) in default_pins::TABLE {
                    if let Err(e) = self.sysfs.write_pin(&device, &phc, pin, value) {
                        error!(device = %device, phc = %phc, pin = %pin, error = %e, "Default pin write failed");
                    }
                }
            }
            info!(device = %device, "Disabled all SMA and U.FL connections");
        }
    }

    fn apply_device_pins(&self, opts: &E810Opts, profile: &mut PtpProfile) {
        for (device, pins) in &opts.device_pins {
            let id = self.clock_identity(profile, device);
            if !id.is_resolved() {
                warn!(device = %device, "Clock identity unresolved");
            }
            profile
                .ptp_settings
                .insert(settings::clock_id_key(device), id.to_string());

            for (pin, value) in pins {
                if let Err(e) = self.sysfs.write_pin_all_phcs(device, pin, value) {
                    error!(device = %device, pin = %pin, value = %value, error = %e, "Failed to apply pin");
                }
            }
        }
    }

    fn apply_phase_offset_pins(&self, opts: &E810Opts, profile: &mut PtpProfile) {
        for (iface, properties) in &opts.phase_offset_pins {
            if !opts.device_pins.contains_key(iface) {
                let known: Vec<&str> = opts.device_pins.keys().map(String::as_str).collect();
                error!(
                    iface = %iface,
                    "Phase offset pin filter initialization failed: interface not found among {:?}",
                    known
                );
                break;
            }

            let clock_id = profile
                .ptp_settings
                .get(&settings::clock_id_key(iface))
                .cloned()
                .unwrap_or_else(|| ClockIdentity::UNRESOLVED.to_string());
            for (property, value) in properties {
                let key = [iface.as_str(), settings::PHASE_OFFSET_FILTER, clock_id.as_str(), property.as_str()].join(".");
                profile.ptp_settings.insert(key, value.clone());
            }
        }
    }
}

impl HardwarePlugin for E810Plugin {
    fn name(&self) -> &str {
        hw_const::E810_PLUGIN_NAME
    }

    fn on_config_change(&self, profile: &mut PtpProfile) -> Result<()> {
        let Some(opts) = E810Opts::from_profile(profile)? else {
            return Ok(());
        };
        info!("Applying e810 configuration");
        self.resolver.new_generation();

        if opts.enable_default_config {
            self.apply_default_config();
        }

        self.apply_device_pins(&opts, profile);

        for (key, value) in &opts.dpll_settings {
            profile
                .ptp_settings
                .entry(key.clone())
                .or_insert_with(|| value.to_string());
        }

        self.apply_phase_offset_pins(&opts, profile);
        Ok(())
    }

    fn after_run_command(&self, profile: &PtpProfile, command: &str) -> Result<()> {
        if command != hw_const::GNSS_COMMAND {
            debug!(command = %command, "Nothing to do after command");
            return Ok(());
        }
        let Some(opts) = E810Opts::from_profile(profile)? else {
            return Ok(());
        };

        info!(command = %command, "Configuring u-blox receiver");
        for cmd in opts.ublx_commands() {
            let output = match self.tools.run(&self.ubxtool, &cmd.args) {
                Ok(output) => output,
                Err(e) => {
                    error!(tool = %self.ubxtool, args = %cmd.args.join(" "), error = %e, "ubxtool failed");
                    continue;
                }
            };
            if cmd.report_output {
                debug!(output = %output, "Saving ubxtool output to hardware status");
                self.statuses
                    .lock()
                    .push(format!("{}{}", hw_const::UBLX_STATUS_PREFIX, output));
            }
        }
        Ok(())
    }

    fn populate_hardware_status(&self, out: &mut Vec<HwConfig>) -> Result<()> {
        out.extend(
            self.statuses
                .lock()
                .iter()
                .map(|status| HwConfig::new(hw_const::E810_DEVICE_ID, status.as_str())),
        );
        Ok(())
    }
}
