//! Constants and configuration values for the PTP daemon
//!
//! Centralizes process names, metric names, sysfs paths, PCI layout constants
//! and timing defaults. Add new magic numbers here rather than inline.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Network class directory; each entry links to its PCI device
    pub const SYS_CLASS_NET: &str = "/sys/class/net";

    /// Default directory holding per-node profiles
    pub const PROFILE_DIR: &str = "/etc/linuxptp";

    /// Default directory for generated process configuration files
    pub const RUN_DIR: &str = "/var/run";
}

/// Synchronization process names and markers
pub mod process {
    pub const PTP4L: &str = "ptp4l";
    pub const PHC2SYS: &str = "phc2sys";
    pub const TS2PHC: &str = "ts2phc";
    pub const GPSPIPE: &str = "gpspipe";

    /// Interface name phc2sys reports for the system clock
    pub const CLOCK_REALTIME: &str = "CLOCK_REALTIME";

    /// Interface name ptp4l reports for its upstream master
    pub const MASTER: &str = "master";

    /// Config sections that do not name an interface
    pub const NON_INTERFACE_SECTIONS: &[&str] = &["global", "nmea", "unicast_master_table"];

    /// ts2phc config key naming the GNSS serial port gpspipe feeds
    pub const NMEA_SERIALPORT_KEY: &str = "ts2phc.nmea_serialport";

    /// Marker preceding the clock class value in ptp4l output
    pub const CLOCK_CLASS_CHANGE: &str = "CLOCK_CLASS_CHANGE";
}

/// Metric names and label keys
pub mod metrics {
    pub const OFFSET: &str = "ptp_offset_ns";
    pub const MAX_OFFSET: &str = "ptp_max_offset_ns";
    pub const FREQUENCY_ADJUSTMENT: &str = "ptp_frequency_adjustment_ns";
    pub const DELAY: &str = "ptp_delay_ns";
    pub const CLOCK_STATE: &str = "ptp_clock_state";
    pub const CLOCK_CLASS: &str = "ptp_clock_class";

    pub const LABEL_FROM: &str = "from";
    pub const LABEL_PROCESS: &str = "process";
    pub const LABEL_NODE: &str = "node";
    pub const LABEL_IFACE: &str = "iface";
}

/// PCI configuration space layout
pub mod pci {
    /// Extended capability ID of the Device Serial Number record
    pub const EXT_CAP_ID_DSN: u16 = 3;

    /// Size of the legacy configuration header; extended capabilities follow it
    pub const CFG_SPACE_SIZE: usize = 256;

    /// Full extended configuration space size
    pub const CFG_SPACE_EXP_SIZE: usize = 4096;

    /// Offset of the next-pointer word within a capability header
    pub const EXT_CAP_NEXT_OFFSET: usize = 2;

    /// Low bits of the next-pointer word hold the capability version
    pub const EXT_CAP_OFFSET_SHIFT: u16 = 4;

    /// Offset of capability data past the header
    pub const EXT_CAP_DATA_OFFSET: usize = 4;

    /// Upper bound on records in one chain (each record is at least 4 bytes)
    pub const MAX_EXT_CAP_RECORDS: usize = (CFG_SPACE_EXP_SIZE - CFG_SPACE_SIZE) / 4;
}

/// Keys written into the profile's shared settings map
pub mod settings {
    /// Label prefix for a resolved hardware clock identity: `clockId[<device>]`
    pub const CLOCK_ID_LABEL: &str = "clockId";

    /// Middle component of phase offset filter keys
    pub const PHASE_OFFSET_FILTER: &str = "phaseOffsetFilter";

    /// Settings key holding the clock identity for a device
    pub fn clock_id_key(device: &str) -> String {
        format!("{}[{}]", CLOCK_ID_LABEL, device)
    }
}

/// Timing defaults
pub mod timing {
    use super::Duration;

    /// Profile poll interval
    pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

    /// Holdover expiry scan period
    pub const DEFAULT_HOLDOVER_SCAN: Duration = Duration::from_millis(1000);

    /// Upper bound on one plugin hook invocation
    pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(10);

    /// Delay before restarting an exited process
    pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_millis(1000);

    /// Wait between checks for a missing node profile
    pub const PROFILE_WAIT: Duration = Duration::from_secs(60);
}
