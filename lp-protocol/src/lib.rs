//! Shared data types for the PTP daemon
//!
//! The node profile document the daemon consumes, the clock threshold policy
//! attached to each synchronization process, and the hardware-status records
//! vendor plugins surface upward. Plugins and the daemon both depend on this
//! crate so that neither has to know the other's internals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum length of a single sysfs path component (device, PHC or pin name)
const MAX_COMPONENT_LENGTH: usize = 64;

/// Default holdover timeout in seconds when the profile carries no threshold
pub const DEFAULT_HOLDOVER_TIMEOUT_SECS: u64 = 5;

/// Default maximum acceptable offset in nanoseconds
pub const DEFAULT_MAX_OFFSET_THRESHOLD_NS: i64 = 100;

/// Default minimum acceptable offset in nanoseconds
pub const DEFAULT_MIN_OFFSET_THRESHOLD_NS: i64 = -100;

/// Settings key whose presence switches plugins into test mode
pub const UNIT_TEST_SETTING: &str = "unitTest";

const FORBIDDEN_COMPONENT_SEQUENCES: &[&str] = &[
    "..",      // Path traversal
    "/",       // Component must not span directories
    "\0",      // Null byte injection
    "\n",      // Newline injection
];

// ============================================================================
// Node Profile
// ============================================================================

/// Per-process clock quality policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PtpClockThreshold {
    /// Seconds tolerated in holdover before the clock is declared free-running
    #[serde(default = "default_holdover_timeout")]
    pub hold_over_timeout: u64,
    /// Offset ceiling in nanoseconds
    #[serde(default = "default_max_offset")]
    pub max_offset_threshold: i64,
    /// Offset floor in nanoseconds
    #[serde(default = "default_min_offset")]
    pub min_offset_threshold: i64,
}

fn default_holdover_timeout() -> u64 {
    DEFAULT_HOLDOVER_TIMEOUT_SECS
}

fn default_max_offset() -> i64 {
    DEFAULT_MAX_OFFSET_THRESHOLD_NS
}

fn default_min_offset() -> i64 {
    DEFAULT_MIN_OFFSET_THRESHOLD_NS
}

impl Default for PtpClockThreshold {
    fn default() -> Self {
        Self {
            hold_over_timeout: DEFAULT_HOLDOVER_TIMEOUT_SECS,
            max_offset_threshold: DEFAULT_MAX_OFFSET_THRESHOLD_NS,
            min_offset_threshold: DEFAULT_MIN_OFFSET_THRESHOLD_NS,
        }
    }
}

impl PtpClockThreshold {
    /// Reject thresholds whose floor is not strictly below the ceiling
    pub fn validate(&self) -> Result<(), String> {
        if self.min_offset_threshold >= self.max_offset_threshold {
            return Err(format!(
                "minOffsetThreshold ({}) must be less than maxOffsetThreshold ({})",
                self.min_offset_threshold, self.max_offset_threshold
            ));
        }
        Ok(())
    }
}

/// The node profile: which synchronization processes to run, their
/// configuration text, per-plugin option blocks, and the shared settings map
/// plugins use to hand derived values to the rest of the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PtpProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub ptp4l_opts: Option<String>,
    #[serde(default)]
    pub ptp4l_conf: Option<String>,
    #[serde(default)]
    pub phc2sys_opts: Option<String>,
    #[serde(default, rename = "ts2phcOpts")]
    pub ts2phc_opts: Option<String>,
    #[serde(default, rename = "ts2phcConf")]
    pub ts2phc_conf: Option<String>,
    #[serde(default)]
    pub ptp_clock_threshold: Option<PtpClockThreshold>,
    /// Vendor plugin option blocks, keyed by plugin name
    #[serde(default)]
    pub plugins: BTreeMap<String, serde_json::Value>,
    /// String settings shared between plugins and the daemon
    #[serde(default)]
    pub ptp_settings: BTreeMap<String, String>,
}

impl PtpProfile {
    /// Parse a profile from its JSON text
    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Invalid profile JSON: {}", e))
    }

    /// Effective clock threshold (defaults when the profile omits it)
    pub fn threshold(&self) -> PtpClockThreshold {
        self.ptp_clock_threshold.unwrap_or_default()
    }

    /// Option block for a plugin, if the profile configures it
    pub fn plugin_options(&self, name: &str) -> Option<&serde_json::Value> {
        self.plugins.get(name)
    }

    /// Plugin names configured by this profile, in sorted order
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    /// Whether plugins should substitute synthetic hardware values
    pub fn is_unit_test(&self) -> bool {
        self.ptp_settings.contains_key(UNIT_TEST_SETTING)
    }
}

// ============================================================================
// Hardware Status
// ============================================================================

/// A hardware-status record reported by a vendor plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HwConfig {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub status: String,
}

impl HwConfig {
    pub fn new(device_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            status: status.into(),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validate one sysfs path component (network device, PHC or pin name)
/// before it is joined into a path that will be written.
pub fn validate_sysfs_component(component: &str) -> Result<(), String> {
    if component.is_empty() {
        return Err("Path component cannot be empty".into());
    }

    if component.len() > MAX_COMPONENT_LENGTH {
        return Err(format!(
            "Path component too long: {} > {} chars",
            component.len(),
            MAX_COMPONENT_LENGTH
        ));
    }

    for forbidden in FORBIDDEN_COMPONENT_SEQUENCES {
        if component.contains(forbidden) {
            return Err(format!("Path component contains forbidden sequence: {:?}", forbidden));
        }
    }

    for c in component.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(format!("Path component contains invalid character: {:?}", c));
        }
    }

    Ok(())
}
