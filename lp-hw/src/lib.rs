//! Vendor hardware plugins for the PTP daemon
//!
//! Provides the plugin factory the daemon calls once per configured plugin
//! name, and the hardware access layers the plugins share:
//! - sysfs pin routing and PCI configuration space reads
//! - external vendor tools (ubxtool)

pub mod intel;
pub mod sysfs;
pub mod tools;
pub mod constants;

pub use constants as hw_const;
pub use intel::{E810Opts, E810Plugin, UblxCmd};
pub use sysfs::SysfsNet;
pub use tools::{CommandRunner, ToolRunner};

use std::sync::Arc;

use lp_core::HardwarePlugin;
use tracing::{error, info};

/// Plugin names this crate can build
pub const AVAILABLE_PLUGINS: &[&str] = &[hw_const::E810_PLUGIN_NAME];

/// Build the plugin registered under `name`, using the real sysfs tree and
/// tool runner. Returns `None` for unknown names.
pub fn create_plugin(name: &str) -> Option<Arc<dyn HardwarePlugin>> {
    match name {
        hw_const::E810_PLUGIN_NAME => {
            info!(plugin = %name, "Creating plugin");
            Some(Arc::new(E810Plugin::new(SysfsNet::default(), Arc::new(CommandRunner))))
        }
        _ => {
            error!(plugin = %name, available = ?AVAILABLE_PLUGINS, "Unknown plugin");
            None
        }
    }
}
