//! Node profile polling and apply pipeline
//!
//! The profile file is re-read every update interval and applied only when
//! its bytes change. A bad profile after startup is logged and the running
//! configuration is kept.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lp_core::{descriptors_from_profile, ClockThreshold};
use lp_error::{PtpError, Result};
use lp_protocol::PtpProfile;

use crate::hooks::HookDispatcher;
use crate::supervisor::Supervisor;

// ============================================================================
// Profile Watcher
// ============================================================================

/// Tracks the last seen contents of the node profile
pub struct ProfileWatcher {
    path: PathBuf,
    last: Option<Vec<u8>>,
}

impl ProfileWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the profile; `Ok(None)` when the bytes are unchanged.
    ///
    /// Contents that fail to parse are still remembered, so the same broken
    /// file is reported once.
    pub async fn poll(&mut self) -> Result<Option<PtpProfile>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| PtpError::FileRead {
            path: self.path.clone(),
            source: e,
        })?;
        if self.last.as_deref() == Some(bytes.as_slice()) {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.last = Some(bytes);

        let profile = PtpProfile::from_json(&text).map_err(PtpError::Config)?;
        debug!(path = %self.path.display(), "Profile changed");
        Ok(Some(profile))
    }
}

fn is_missing(e: &PtpError) -> bool {
    matches!(e, PtpError::FileRead { source, .. } if source.kind() == ErrorKind::NotFound)
}

/// Wait for the initial profile.
///
/// A missing file is retried every `retry`; any other failure is returned.
/// `Ok(None)` means shutdown was requested while waiting.
pub async fn wait_for_profile(
    watcher: &mut ProfileWatcher,
    retry: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<PtpProfile>> {
    loop {
        match watcher.poll().await {
            Ok(Some(profile)) => return Ok(Some(profile)),
            Ok(None) => {}
            Err(e) if is_missing(&e) => {
                info!(path = %watcher.path().display(), "Waiting for node profile");
            }
            Err(e) => return Err(e),
        }
        tokio::select! {
            _ = tokio::time::sleep(retry) => {}
            _ = shutdown.changed() => return Ok(None),
        }
    }
}

// ============================================================================
// Apply
// ============================================================================

/// Run plugins on a new profile and restart processes with it.
///
/// An inconsistent clock threshold rejects the profile before any plugin or
/// process is touched.
pub async fn apply_profile(
    mut profile: PtpProfile,
    run_dir: &Path,
    hooks: &HookDispatcher,
    supervisor: &mut Supervisor,
) -> Result<()> {
    ClockThreshold::try_from(profile.threshold())?;

    hooks.on_config_change(&mut profile).await;
    let descriptors = descriptors_from_profile(&profile, run_dir)?;

    info!(
        profile = %profile.name.as_deref().unwrap_or("<unnamed>"),
        processes = descriptors.len(),
        "Applying profile"
    );
    supervisor.apply(Arc::new(profile), descriptors).await;
    Ok(())
}

/// Poll the profile and apply changes until shutdown
pub async fn run_reload_loop(
    mut watcher: ProfileWatcher,
    interval: Duration,
    run_dir: PathBuf,
    hooks: Arc<HookDispatcher>,
    supervisor: &mut Supervisor,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial profile is already applied
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        match watcher.poll().await {
            Ok(Some(profile)) => {
                if let Err(e) = apply_profile(profile, &run_dir, &hooks, supervisor).await {
                    error!(error = %e, "Rejected profile, keeping current configuration");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read profile, keeping current configuration"),
        }
    }
    debug!("Reload loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{ProcessEvent, ProcessLauncher, RunningProcess};
    use lp_core::{ClockStateTracker, MetricsRegistry, PluginRegistry, ProcessDescriptor};
    use tempfile::TempDir;
    use tokio::sync::{mpsc, oneshot};

    const PROFILE: &str = r#"{
        "name": "grandmaster",
        "ts2phcOpts": "-s generic",
        "ts2phcConf": "[global]\n[ens2f0]\n"
    }"#;

    /// Launcher whose processes run until stopped
    struct IdleLauncher;

    impl ProcessLauncher for IdleLauncher {
        fn launch(&self, _descriptor: &ProcessDescriptor) -> Result<RunningProcess> {
            let (tx, rx) = mpsc::unbounded_channel();
            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            tokio::spawn(async move {
                let _ = stop_rx.await;
                let _ = tx.send(ProcessEvent::Exited(None));
            });
            Ok(RunningProcess::new(rx, stop_tx))
        }
    }

    fn supervisor() -> (Supervisor, Arc<HookDispatcher>) {
        let registry = MetricsRegistry::new("node").unwrap();
        let tracker = Arc::new(ClockStateTracker::new(registry.metrics().clone()));
        let hooks = Arc::new(HookDispatcher::new(PluginRegistry::new(), Duration::from_secs(1)));
        let supervisor = Supervisor::new(Arc::new(IdleLauncher), tracker, Arc::clone(&hooks), Duration::from_millis(10));
        (supervisor, hooks)
    }

    #[tokio::test]
    async fn test_watcher_reports_only_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node");
        std::fs::write(&path, PROFILE).unwrap();

        let mut watcher = ProfileWatcher::new(&path);
        let profile = watcher.poll().await.unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("grandmaster"));
        assert!(watcher.poll().await.unwrap().is_none());

        std::fs::write(&path, PROFILE.replace("grandmaster", "boundary")).unwrap();
        let profile = watcher.poll().await.unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("boundary"));
    }

    #[tokio::test]
    async fn test_watcher_reports_broken_profile_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node");
        std::fs::write(&path, "{ not json").unwrap();

        let mut watcher = ProfileWatcher::new(&path);
        assert!(matches!(watcher.poll().await, Err(PtpError::Config(_))));
        assert!(watcher.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_profile_retries_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node");
        let mut watcher = ProfileWatcher::new(&path);
        let (_tx, mut rx) = watch::channel(false);

        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tokio::fs::write(&writer_path, PROFILE).await.unwrap();
        });

        let profile = wait_for_profile(&mut watcher, Duration::from_millis(10), &mut rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.name.as_deref(), Some("grandmaster"));
    }

    #[tokio::test]
    async fn test_wait_for_profile_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut watcher = ProfileWatcher::new(dir.path().join("absent"));
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let result = wait_for_profile(&mut watcher, Duration::from_secs(60), &mut rx).await;
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_profile_starts_processes() {
        let dir = TempDir::new().unwrap();
        let (mut supervisor, hooks) = supervisor();

        let profile = PtpProfile::from_json(PROFILE).unwrap();
        apply_profile(profile, dir.path(), &hooks, &mut supervisor).await.unwrap();
        assert_eq!(supervisor.running(), vec!["ts2phc"]);
        assert!(dir.path().join("ts2phc.0.config").exists());
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_inverted_threshold_keeps_running_set() {
        let dir = TempDir::new().unwrap();
        let (mut supervisor, hooks) = supervisor();

        let profile = PtpProfile::from_json(PROFILE).unwrap();
        apply_profile(profile, dir.path(), &hooks, &mut supervisor).await.unwrap();

        let mut bad = PtpProfile::from_json(PROFILE).unwrap();
        bad.ptp_clock_threshold = Some(lp_protocol::PtpClockThreshold {
            hold_over_timeout: 5,
            max_offset_threshold: -10,
            min_offset_threshold: 10,
        });
        let err = apply_profile(bad, dir.path(), &hooks, &mut supervisor).await.unwrap_err();
        assert!(matches!(err, PtpError::InvalidConfig { .. }));
        assert_eq!(supervisor.running(), vec!["ts2phc"]);
        supervisor.stop().await;
    }
}
