//! Command Line Interface
//!
//! Flags and their validated runtime form.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use lp_core::constants::{paths, timing};
use lp_error::{PtpError, Result};

#[derive(Parser, Debug, Clone)]
#[command(name = "linuxptp-daemon")]
#[command(version)]
#[command(about = "Supervises linuxptp processes and exports clock telemetry")]
#[command(long_about = "Supervises linuxptp processes and exports clock telemetry

Reads the node profile <linuxptp-profile-path>/<node-name>, runs the
synchronization processes it describes, and serves Prometheus metrics and
hardware status over HTTP.

ENDPOINTS:
    GET /metrics     Prometheus text exposition
    GET /hwstatus    Hardware status records as JSON

ENVIRONMENT VARIABLES:
    NODE_NAME        Node name (profile file name, metric label)
    PTP_LOG=debug    Log filter (trace, debug, info, warn, error)")]
pub struct Cli {
    /// Directory holding per-node profiles
    #[arg(long, default_value = paths::PROFILE_DIR)]
    pub linuxptp_profile_path: PathBuf,

    /// Profile poll interval in seconds
    #[arg(long, default_value_t = timing::DEFAULT_UPDATE_INTERVAL.as_secs())]
    pub update_interval: u64,

    /// Node name
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Directory for generated process configuration files
    #[arg(long, default_value = paths::RUN_DIR)]
    pub run_dir: PathBuf,

    /// Listen address of the metrics endpoint
    #[arg(long, default_value = "0.0.0.0:9091")]
    pub metrics_addr: SocketAddr,

    /// Holdover expiry scan period in milliseconds
    #[arg(long, default_value_t = timing::DEFAULT_HOLDOVER_SCAN.as_millis() as u64)]
    pub holdover_scan_ms: u64,

    /// Upper bound on one plugin hook invocation in seconds
    #[arg(long, default_value_t = timing::DEFAULT_HOOK_TIMEOUT.as_secs())]
    pub hook_timeout_secs: u64,

    /// Delay before restarting an exited process in milliseconds
    #[arg(long, default_value_t = timing::DEFAULT_RESTART_BACKOFF.as_millis() as u64)]
    pub restart_backoff_ms: u64,

    /// Hardware plugins to register
    #[arg(long, value_delimiter = ',', default_value = "e810")]
    pub plugins: Vec<String>,
}

/// Validated daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub profile_path: PathBuf,
    pub update_interval: Duration,
    pub node_name: String,
    pub run_dir: PathBuf,
    pub metrics_addr: SocketAddr,
    pub holdover_scan: Duration,
    pub hook_timeout: Duration,
    pub restart_backoff: Duration,
    pub plugins: Vec<String>,
}

impl DaemonConfig {
    /// Node profile file: `<profile dir>/<node name>`
    pub fn node_profile(&self) -> PathBuf {
        self.profile_path.join(&self.node_name)
    }
}

impl TryFrom<Cli> for DaemonConfig {
    type Error = PtpError;

    fn try_from(cli: Cli) -> Result<Self> {
        let node_name = cli.node_name.trim().to_string();
        if node_name.is_empty() {
            return Err(PtpError::invalid_config("node-name", "must not be empty"));
        }
        if node_name.contains('/') || node_name == "." || node_name == ".." {
            return Err(PtpError::invalid_config("node-name", "must be a single path component"));
        }
        if cli.update_interval == 0 {
            return Err(PtpError::invalid_config("update-interval", "must be at least 1 second"));
        }
        if cli.holdover_scan_ms == 0 {
            return Err(PtpError::invalid_config("holdover-scan-ms", "must be positive"));
        }
        if cli.hook_timeout_secs == 0 {
            return Err(PtpError::invalid_config("hook-timeout-secs", "must be positive"));
        }

        Ok(Self {
            profile_path: cli.linuxptp_profile_path,
            update_interval: Duration::from_secs(cli.update_interval),
            node_name,
            run_dir: cli.run_dir,
            metrics_addr: cli.metrics_addr,
            holdover_scan: Duration::from_millis(cli.holdover_scan_ms),
            hook_timeout: Duration::from_secs(cli.hook_timeout_secs),
            restart_backoff: Duration::from_millis(cli.restart_backoff_ms),
            plugins: cli
                .plugins
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        })
    }
}
