//! PTP daemon core library
//!
//! Telemetry parsing, clock state tracking and metric export for the
//! synchronization processes the daemon supervises, plus the hardware plugin
//! contract and PCI identity walk vendor plugins build on.

pub mod constants;
pub mod metrics;
pub mod parser;
pub mod pci;
pub mod plugin;
pub mod process;
pub mod tracker;

pub use lp_error::{PtpError, Result};

pub use metrics::{interface_alias, MetricsRegistry, PtpMetrics};
pub use parser::{parse, ClockSource, MetricSample, OffsetSample, SyncState};
pub use pci::{dsn_from_config_space, ClockIdResolver, ClockIdentity, ConfigSpaceSource};
pub use plugin::{merge_settings, HardwarePlugin, PluginRegistry};
pub use process::{descriptors_from_profile, ClockThreshold, ProcessDescriptor, ProcessKind};
pub use tracker::{ClockKey, ClockState, ClockStateTracker};
