//! Process supervisor
//!
//! One task per [`ProcessDescriptor`]: launch the process, feed each output
//! line to the parser and tracker, fire `AfterRunCommand` after every launch
//! (one hook run at a time per process), and relaunch after a backoff when
//! the process exits. Applying a new descriptor set stops and joins every
//! task before the new set starts.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use lp_core::{parse, ClockStateTracker, ProcessDescriptor};
use lp_error::{PtpError, Result};
use lp_protocol::PtpProfile;

use crate::hooks::HookDispatcher;

/// Upper bound on waiting for a stopped process to report its exit
const STOP_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Process Launching
// ============================================================================

/// Output and lifecycle events of a launched process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One complete line of stdout or stderr
    Line(String),
    /// Exit code, `None` when killed by a signal
    Exited(Option<i32>),
}

/// Handle to a launched process
pub struct RunningProcess {
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
    stop: Option<oneshot::Sender<()>>,
}

impl RunningProcess {
    pub fn new(events: mpsc::UnboundedReceiver<ProcessEvent>, stop: oneshot::Sender<()>) -> Self {
        Self {
            events,
            stop: Some(stop),
        }
    }

    /// Ask the process to terminate; an `Exited` event follows
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Starts OS processes for descriptors
pub trait ProcessLauncher: Send + Sync {
    /// Must be called from within a tokio runtime
    fn launch(&self, descriptor: &ProcessDescriptor) -> Result<RunningProcess>;
}

/// Launches real child processes with piped stdout and stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

/// Forward newline-terminated chunks as lines until EOF.
///
/// Bytes that are not valid UTF-8 are replaced rather than ending the stream,
/// and a trailing chunk without a newline is still delivered.
async fn forward_lines<R>(reader: R, events: mpsc::UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if events.send(ProcessEvent::Line(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output stream closed");
                break;
            }
        }
    }
}

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, descriptor: &ProcessDescriptor) -> Result<RunningProcess> {
        let mut child = Command::new(&descriptor.program)
            .args(&descriptor.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PtpError::process(&descriptor.name, format!("failed to spawn: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }

        let name = descriptor.name.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = stop_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!(process = %name, error = %e, "Failed to kill process");
                    }
                    child.wait().await
                }
            };
            // Deliver trailing output before the exit event
            for reader in readers {
                let _ = reader.await;
            }
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(process = %name, error = %e, "Failed to wait for process");
                    None
                }
            };
            let _ = tx.send(ProcessEvent::Exited(code));
        });

        Ok(RunningProcess::new(rx, stop_tx))
    }
}

// ============================================================================
// Supervision
// ============================================================================

/// Whether a line belongs to the process instance tagged `tag`.
///
/// Lines without a `[*.config]` tag are accepted.
pub fn line_matches_tag(line: &str, tag: &str) -> bool {
    match line
        .split_whitespace()
        .find(|t| t.starts_with('[') && t.ends_with(".config]"))
    {
        Some(found) => found == tag,
        None => true,
    }
}

/// Shared collaborators of every supervision task
struct TaskContext {
    launcher: Arc<dyn ProcessLauncher>,
    tracker: Arc<ClockStateTracker>,
    hooks: Arc<HookDispatcher>,
    profile: Arc<PtpProfile>,
    restart_backoff: Duration,
}

enum RunOutcome {
    Exited,
    Shutdown,
}

/// Wait for the previous launch's `AfterRunCommand` hooks.
///
/// Hook runs for one process never overlap, and none outlives its task.
async fn finish_hooks(process: &str, pending: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = pending.take() {
        if let Err(e) = handle.await {
            error!(process = %process, error = %e, "AfterRunCommand task failed");
        }
    }
}

async fn supervise(descriptor: ProcessDescriptor, ctx: Arc<TaskContext>, mut shutdown: watch::Receiver<bool>) {
    let mut pending_hooks: Option<JoinHandle<()>> = None;
    loop {
        if *shutdown.borrow() {
            break;
        }

        finish_hooks(&descriptor.name, &mut pending_hooks).await;
        match ctx.launcher.launch(&descriptor) {
            Ok(running) => {
                info!(process = %descriptor.name, args = %descriptor.args.join(" "), "Process started");

                let hooks = Arc::clone(&ctx.hooks);
                let profile = Arc::clone(&ctx.profile);
                let command = descriptor.name.clone();
                pending_hooks = Some(tokio::spawn(async move {
                    hooks.after_run_command(profile, &command).await
                }));

                if let RunOutcome::Shutdown = pump(&descriptor, &ctx, running, &mut shutdown).await {
                    break;
                }
            }
            Err(e) => error!(process = %descriptor.name, error = %e, "Failed to start process"),
        }

        tokio::select! {
            _ = tokio::time::sleep(ctx.restart_backoff) => {}
            _ = shutdown.changed() => break,
        }
        info!(process = %descriptor.name, "Restarting process");
    }
    finish_hooks(&descriptor.name, &mut pending_hooks).await;
    debug!(process = %descriptor.name, "Supervision ended");
}

/// Feed a running process's output to the tracker until it exits or shutdown
async fn pump(
    descriptor: &ProcessDescriptor,
    ctx: &TaskContext,
    mut running: RunningProcess,
    shutdown: &mut watch::Receiver<bool>,
) -> RunOutcome {
    loop {
        tokio::select! {
            event = running.events.recv() => match event {
                Some(ProcessEvent::Line(line)) => handle_line(descriptor, &ctx.tracker, &line),
                Some(ProcessEvent::Exited(code)) => {
                    warn!(process = %descriptor.name, code = ?code, "Process exited");
                    return RunOutcome::Exited;
                }
                None => {
                    warn!(process = %descriptor.name, "Process output closed");
                    return RunOutcome::Exited;
                }
            },
            _ = shutdown.changed() => {
                running.stop();
                let drain = async {
                    while let Some(event) = running.events.recv().await {
                        match event {
                            ProcessEvent::Line(line) => handle_line(descriptor, &ctx.tracker, &line),
                            ProcessEvent::Exited(_) => break,
                        }
                    }
                };
                if tokio::time::timeout(STOP_GRACE, drain).await.is_err() {
                    warn!(process = %descriptor.name, "Process did not exit in time");
                }
                info!(process = %descriptor.name, "Process stopped");
                return RunOutcome::Shutdown;
            }
        }
    }
}

fn handle_line(descriptor: &ProcessDescriptor, tracker: &ClockStateTracker, line: &str) {
    trace!(process = %descriptor.name, line = %line, "Output");
    if !line_matches_tag(line, &descriptor.message_tag) {
        return;
    }
    if let Some(sample) = parse(&descriptor.name, line) {
        tracker.observe(&sample);
    }
}

async fn write_config_file(descriptor: &ProcessDescriptor) -> Result<()> {
    let Some(config) = &descriptor.config_file else {
        return Ok(());
    };
    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| PtpError::FileWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    tokio::fs::write(&config.path, &config.contents)
        .await
        .map_err(|e| PtpError::FileWrite {
            path: config.path.clone(),
            source: e,
        })?;
    debug!(process = %descriptor.name, path = %config.path.display(), "Wrote process config");
    Ok(())
}

/// Owns the supervision tasks of the active descriptor set
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    tracker: Arc<ClockStateTracker>,
    hooks: Arc<HookDispatcher>,
    restart_backoff: Duration,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        tracker: Arc<ClockStateTracker>,
        hooks: Arc<HookDispatcher>,
        restart_backoff: Duration,
    ) -> Self {
        Self {
            launcher,
            tracker,
            hooks,
            restart_backoff,
            shutdown: None,
            tasks: Vec::new(),
        }
    }

    /// Names of the supervised processes
    pub fn running(&self) -> Vec<String> {
        self.tasks.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Replace the supervised set.
    ///
    /// Stops every current process, writes config files, re-keys the
    /// tracker, then starts the new set. A descriptor whose config file
    /// cannot be written is not started.
    pub async fn apply(&mut self, profile: Arc<PtpProfile>, descriptors: Vec<ProcessDescriptor>) {
        self.stop().await;

        let mut startable = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            match write_config_file(descriptor).await {
                Ok(()) => startable.push(descriptor.clone()),
                Err(e) => error!(process = %descriptor.name, error = %e, "Not starting process"),
            }
        }

        self.tracker.apply_descriptors(&descriptors);

        let (tx, rx) = watch::channel(false);
        let ctx = Arc::new(TaskContext {
            launcher: Arc::clone(&self.launcher),
            tracker: Arc::clone(&self.tracker),
            hooks: Arc::clone(&self.hooks),
            profile,
            restart_backoff: self.restart_backoff,
        });

        for descriptor in startable {
            let name = descriptor.name.clone();
            let handle = tokio::spawn(supervise(descriptor, Arc::clone(&ctx), rx.clone()));
            self.tasks.push((name, handle));
        }
        self.shutdown = Some(tx);
        info!(processes = ?self.running(), "Process set applied");
    }

    /// Stop every process and wait for the supervision tasks to finish
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                error!(process = %name, error = %e, "Supervision task failed");
            }
        }
    }
}
