//! Process descriptors derived from the node profile
//!
//! One [`ProcessDescriptor`] per synchronization process the profile asks for.
//! Descriptors are rebuilt wholesale on every reload and never mutated.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use lp_protocol::{PtpClockThreshold, PtpProfile};

use crate::constants::process as proc_const;
use crate::parser::ClockSource;
use crate::{PtpError, Result};

// ============================================================================
// Process Kinds
// ============================================================================

/// Process type; selects the output grammar the parser applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Ptp4l,
    Phc2sys,
    Ts2phc,
    Gpspipe,
    Other,
}

impl ProcessKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            proc_const::PTP4L => ProcessKind::Ptp4l,
            proc_const::PHC2SYS => ProcessKind::Phc2sys,
            proc_const::TS2PHC => ProcessKind::Ts2phc,
            proc_const::GPSPIPE => ProcessKind::Gpspipe,
            _ => ProcessKind::Other,
        }
    }

    /// Literal source markers this process prints before `offset`
    pub fn source_markers(self) -> &'static [(&'static str, ClockSource)] {
        match self {
            ProcessKind::Ptp4l => &[("master", ClockSource::Master)],
            ProcessKind::Phc2sys => &[("phc", ClockSource::Phc), ("sys", ClockSource::Phc)],
            ProcessKind::Ts2phc => &[("master", ClockSource::Master)],
            ProcessKind::Gpspipe | ProcessKind::Other => &[],
        }
    }

    pub fn source_for_marker(self, marker: &str) -> Option<ClockSource> {
        self.source_markers()
            .iter()
            .find(|(m, _)| *m == marker)
            .map(|(_, source)| *source)
    }

    /// Source reported by `rms ... max ...` summary lines, if the process prints them
    pub fn summary_source(self) -> Option<ClockSource> {
        match self {
            ProcessKind::Ptp4l => Some(ClockSource::Master),
            ProcessKind::Phc2sys => Some(ClockSource::Phc),
            _ => None,
        }
    }

    pub fn emits_clock_class(self) -> bool {
        self == ProcessKind::Ptp4l
    }

    /// Interfaces the process reports on that are not NIC names
    fn pseudo_interfaces(self) -> &'static [&'static str] {
        match self {
            ProcessKind::Ptp4l => &[proc_const::MASTER],
            ProcessKind::Phc2sys => &[proc_const::CLOCK_REALTIME],
            _ => &[],
        }
    }
}

// ============================================================================
// Clock Threshold
// ============================================================================

/// Validated per-process clock quality policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockThreshold {
    pub holdover_timeout: Duration,
    pub max_offset_threshold: i64,
    pub min_offset_threshold: i64,
}

impl ClockThreshold {
    /// Whether an offset lies within `[min, max]`
    pub fn offset_in_range(&self, offset: i64) -> bool {
        (self.min_offset_threshold..=self.max_offset_threshold).contains(&offset)
    }

    fn from_profile_threshold(t: &PtpClockThreshold) -> Self {
        Self {
            holdover_timeout: Duration::from_secs(t.hold_over_timeout),
            max_offset_threshold: t.max_offset_threshold,
            min_offset_threshold: t.min_offset_threshold,
        }
    }
}

impl Default for ClockThreshold {
    fn default() -> Self {
        // Defaults always satisfy min < max
        Self::from_profile_threshold(&PtpClockThreshold::default())
    }
}

impl TryFrom<PtpClockThreshold> for ClockThreshold {
    type Error = PtpError;

    fn try_from(t: PtpClockThreshold) -> Result<Self> {
        t.validate()
            .map_err(|reason| PtpError::invalid_config("ptpClockThreshold", reason))?;
        Ok(Self::from_profile_threshold(&t))
    }
}

// ============================================================================
// Process Descriptor
// ============================================================================

/// Generated configuration file a process is launched with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: PathBuf,
    pub contents: String,
}

/// One supervised synchronization process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    /// Logical name, e.g. "phc2sys"
    pub name: String,
    pub kind: ProcessKind,
    /// Tag the process prefixes its lines with, e.g. "[ptp4l.0.config]"
    pub message_tag: String,
    /// Interfaces the process reports on
    pub interfaces: BTreeSet<String>,
    pub threshold: Arc<ClockThreshold>,
    pub program: String,
    pub args: Vec<String>,
    pub config_file: Option<ConfigFile>,
}

impl ProcessDescriptor {
    pub fn reports_on(&self, interface: &str) -> bool {
        self.interfaces.contains(interface)
    }
}

fn config_file_name(process: &str) -> String {
    format!("{}.0.config", process)
}

fn message_tag(process: &str) -> String {
    format!("[{}]", config_file_name(process))
}

static SECTION_HEADER: OnceLock<Option<Regex>> = OnceLock::new();

/// `[name]` section header pattern, compiled once per process
fn section_header() -> Option<&'static Regex> {
    SECTION_HEADER
        .get_or_init(|| Regex::new(r"(?m)^\s*\[\s*([^\]\s]+)\s*\]\s*$").ok())
        .as_ref()
}

/// Interface names declared as `[section]` headers in a process config
pub fn config_interfaces(conf: &str) -> BTreeSet<String> {
    let Some(section) = section_header() else {
        return BTreeSet::new();
    };
    section
        .captures_iter(conf)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .filter(|name| !proc_const::NON_INTERFACE_SECTIONS.contains(name))
        .map(str::to_string)
        .collect()
}

/// Value of `key` in a process config (`key value` lines)
pub fn config_value<'a>(conf: &'a str, key: &str) -> Option<&'a str> {
    conf.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(k), Some(v)) if k == key => Some(v),
            _ => None,
        }
    })
}

fn split_opts(opts: &str) -> Vec<String> {
    opts.split_whitespace().map(str::to_string).collect()
}

/// Build the descriptor set for a profile.
///
/// Rejects profiles whose clock threshold is inconsistent; configuration
/// files are placed under `run_dir`.
pub fn descriptors_from_profile(profile: &PtpProfile, run_dir: &Path) -> Result<Vec<ProcessDescriptor>> {
    let threshold = Arc::new(ClockThreshold::try_from(profile.threshold())?);
    let mut descriptors = Vec::new();

    let mut base_interfaces = BTreeSet::new();
    if let Some(iface) = profile.interface.as_deref().filter(|s| !s.is_empty()) {
        base_interfaces.insert(iface.to_string());
    }

    let ptp4l_conf = profile.ptp4l_conf.clone().unwrap_or_default();
    let mut ptp4l_interfaces = base_interfaces.clone();
    ptp4l_interfaces.extend(config_interfaces(&ptp4l_conf));

    if let Some(opts) = profile.ptp4l_opts.as_deref() {
        let path = run_dir.join(config_file_name(proc_const::PTP4L));
        let mut args = vec!["-f".to_string(), path.to_string_lossy().to_string()];
        args.extend(split_opts(opts));
        descriptors.push(build(
            proc_const::PTP4L,
            message_tag(proc_const::PTP4L),
            ptp4l_interfaces.clone(),
            &threshold,
            args,
            Some(ConfigFile { path, contents: ptp4l_conf.clone() }),
        ));
    }

    if let Some(opts) = profile.phc2sys_opts.as_deref() {
        // phc2sys follows ptp4l and shares its tag
        descriptors.push(build(
            proc_const::PHC2SYS,
            message_tag(proc_const::PTP4L),
            ptp4l_interfaces,
            &threshold,
            split_opts(opts),
            None,
        ));
    }

    if let Some(opts) = profile.ts2phc_opts.as_deref() {
        let conf = profile.ts2phc_conf.clone().unwrap_or_default();
        let path = run_dir.join(config_file_name(proc_const::TS2PHC));
        let mut interfaces = base_interfaces.clone();
        interfaces.extend(config_interfaces(&conf));
        let mut args = vec!["-f".to_string(), path.to_string_lossy().to_string()];
        args.extend(split_opts(opts));

        let serial_port = config_value(&conf, proc_const::NMEA_SERIALPORT_KEY).map(str::to_string);

        descriptors.push(build(
            proc_const::TS2PHC,
            message_tag(proc_const::TS2PHC),
            interfaces,
            &threshold,
            args,
            Some(ConfigFile { path, contents: conf }),
        ));

        if let Some(port) = serial_port {
            descriptors.push(build(
                proc_const::GPSPIPE,
                format!("[{}]", proc_const::GPSPIPE),
                BTreeSet::new(),
                &threshold,
                vec!["-d".into(), "-r".into(), "-l".into(), "-o".into(), port],
                None,
            ));
        }
    }

    debug!("Built {} process descriptors from profile", descriptors.len());
    Ok(descriptors)
}

fn build(
    name: &str,
    message_tag: String,
    mut interfaces: BTreeSet<String>,
    threshold: &Arc<ClockThreshold>,
    args: Vec<String>,
    config_file: Option<ConfigFile>,
) -> ProcessDescriptor {
    let kind = ProcessKind::from_name(name);
    interfaces.extend(kind.pseudo_interfaces().iter().map(|s| s.to_string()));
    ProcessDescriptor {
        name: name.to_string(),
        kind,
        message_tag,
        interfaces,
        threshold: Arc::clone(threshold),
        program: name.to_string(),
        args,
        config_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PTP4L_CONF: &str = "[global]\ndomainNumber 24\n[ens1f0]\nmasterOnly 0\n[ ens1f1 ]\n";
    const TS2PHC_CONF: &str = "[nmea]\nts2phc.master 1\n[global]\nts2phc.nmea_serialport /dev/gnss0\n[ens2f0]\nts2phc.extts_polarity rising\n";

    fn profile() -> PtpProfile {
        PtpProfile {
            interface: Some("ens1f0".into()),
            ptp4l_opts: Some("-2 -s".into()),
            ptp4l_conf: Some(PTP4L_CONF.into()),
            phc2sys_opts: Some("-a -r".into()),
            ts2phc_opts: Some("-s generic".into()),
            ts2phc_conf: Some(TS2PHC_CONF.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_interfaces_skip_non_interface_sections() {
        let ifaces = config_interfaces(PTP4L_CONF);
        assert_eq!(ifaces.into_iter().collect::<Vec<_>>(), vec!["ens1f0", "ens1f1"]);
        assert_eq!(config_interfaces(TS2PHC_CONF).into_iter().collect::<Vec<_>>(), vec!["ens2f0"]);
    }

    #[test]
    fn test_section_header_compiled_once() {
        let first = section_header().unwrap();
        let second = section_header().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(config_interfaces("  [ ens5f0 ]  \n[global]\nnot a [header]\n").contains("ens5f0"));
    }

    #[test]
    fn test_descriptors_from_profile() {
        let descriptors = descriptors_from_profile(&profile(), Path::new("/var/run")).unwrap();
        let names: Vec<_> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ptp4l", "phc2sys", "ts2phc", "gpspipe"]);

        let ptp4l = &descriptors[0];
        assert_eq!(ptp4l.message_tag, "[ptp4l.0.config]");
        assert_eq!(ptp4l.args, vec!["-f", "/var/run/ptp4l.0.config", "-2", "-s"]);
        assert!(ptp4l.reports_on("master"));
        assert!(ptp4l.reports_on("ens1f1"));

        let phc2sys = &descriptors[1];
        assert_eq!(phc2sys.message_tag, "[ptp4l.0.config]");
        assert!(phc2sys.reports_on("CLOCK_REALTIME"));
        assert!(phc2sys.config_file.is_none());

        let ts2phc = &descriptors[2];
        assert!(ts2phc.reports_on("ens2f0"));
        assert!(ts2phc.reports_on("ens1f0"));
        assert_eq!(ts2phc.config_file.as_ref().unwrap().contents, TS2PHC_CONF);

        let gpspipe = &descriptors[3];
        assert_eq!(gpspipe.args.last().map(String::as_str), Some("/dev/gnss0"));
        assert!(gpspipe.interfaces.is_empty());
    }

    #[test]
    fn test_descriptors_share_threshold() {
        let descriptors = descriptors_from_profile(&profile(), Path::new("/run")).unwrap();
        assert!(Arc::ptr_eq(&descriptors[0].threshold, &descriptors[1].threshold));
        assert_eq!(descriptors[0].threshold.holdover_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_inverted_threshold_rejected_at_load() {
        let mut p = profile();
        p.ptp_clock_threshold = Some(PtpClockThreshold {
            hold_over_timeout: 5,
            max_offset_threshold: -100,
            min_offset_threshold: 100,
        });
        let err = descriptors_from_profile(&p, Path::new("/run")).unwrap_err();
        assert!(matches!(err, PtpError::InvalidConfig { .. }));
    }

    #[test]
    fn test_offset_in_range() {
        let t = ClockThreshold::default();
        assert!(t.offset_in_range(0));
        assert!(t.offset_in_range(100));
        assert!(!t.offset_in_range(101));
        assert!(!t.offset_in_range(-101));
    }
}
