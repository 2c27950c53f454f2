//! Hardware-related constants

/// PCI subsystem device IDs of E810 cards with GNSS and SMA/U.FL connectors
pub const E810_SUBSYSTEM_IDS: &[&str] = &["000e", "000f"];

/// Registry name of the E810 plugin
pub const E810_PLUGIN_NAME: &str = "e810";

/// Device ID reported in E810 hardware-status records
pub const E810_DEVICE_ID: &str = "e810";

/// Process whose launch triggers GNSS receiver configuration
pub const GNSS_COMMAND: &str = "gpspipe";

/// u-blox receiver configuration tool
pub const UBXTOOL_PATH: &str = "/usr/local/bin/ubxtool";

/// Prefix of recorded ubxtool output
pub const UBLX_STATUS_PREFIX: &str = "ublx data: ";

/// Pin name prefix of software-defined pins; these are driven through the
/// PHC's `period` file instead of `pins/<name>`
pub const SDP_PREFIX: &str = "SDP";

/// ubxtool arguments always run after the configured commands:
/// NAV-CLOCK every second, NAV-STATUS every second, then save
pub const DEFAULT_UBLX_CMDS: &[&[&str]] = &[
    &["-p", "CFG-MSG,1,34,1"],
    &["-p", "CFG-MSG,1,3,1"],
    &["-p", "SAVE"],
];

/// Default connector setup: all SMA and U.FL connectors disabled
pub mod default_pins {
    /// Only PHCs exposing this pin receive the default table
    pub const GUARD_PIN: &str = "U.FL2";

    /// (pin, value) pairs, written in order
    pub const TABLE: &[(&str, &str)] = &[
        ("U.FL2", "0 2"),
        ("U.FL1", "0 1"),
        ("SMA2", "0 2"),
        ("SMA1", "0 1"),
    ];
}
