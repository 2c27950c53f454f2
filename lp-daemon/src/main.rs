//! linuxptp daemon
//!
//! Node agent that runs the PTP synchronization processes described by the
//! node profile and turns their output into clock telemetry.
//!
//! # Components
//! - **Supervisor**: one task per process, restarted with backoff on exit
//! - **Tracker**: per (process, interface) clock state with holdover expiry
//! - **Plugins**: vendor hooks run on the blocking pool under a timeout
//! - **Reload**: the profile is polled and re-applied when its bytes change
//! - **Endpoint**: `/metrics` and `/hwstatus` served by axum
//!
//! # Signals
//! SIGHUP, SIGINT, SIGTERM and SIGQUIT stop every process and exit.

mod cli;
mod hooks;
mod holdover;
mod metrics_server;
mod reload;
mod supervisor;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use lp_core::constants::timing;
use lp_core::{ClockStateTracker, MetricsRegistry, PluginRegistry};

use crate::cli::{Cli, DaemonConfig};
use crate::hooks::HookDispatcher;
use crate::holdover::run_holdover_scanner;
use crate::metrics_server::MetricsServer;
use crate::reload::{apply_profile, run_reload_loop, wait_for_profile, ProfileWatcher};
use crate::supervisor::{Supervisor, TokioLauncher};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Journald when running under systemd, stdout otherwise
fn init_logging() {
    let log_level = std::env::var("PTP_LOG").unwrap_or_else(|_| "info".to_string());
    let mut use_journald = Path::new("/run/systemd/journal/socket").exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
                use_journald = false;
                tracing_subscriber::fmt()
                    .with_target(false)
                    .with_level(true)
                    .with_env_filter(&log_level)
                    .init();
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .with_env_filter(&log_level)
            .init();
    }

    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });
}

/// Resolve once any termination signal arrives
async fn wait_for_signal() -> anyhow::Result<&'static str> {
    let mut hup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut int = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;

    let name = tokio::select! {
        _ = hup.recv() => "SIGHUP",
        _ = int.recv() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = DaemonConfig::try_from(cli).context("invalid configuration")?;
    info!(
        version = VERSION,
        node = %config.node_name,
        profile = %config.node_profile().display(),
        "STARTUP: linuxptp-daemon starting"
    );

    let registry = MetricsRegistry::new(config.node_name.as_str()).context("registering metrics")?;
    let tracker = Arc::new(ClockStateTracker::new(registry.metrics().clone()));

    let plugins = PluginRegistry::from_factory(&config.plugins, lp_hw::create_plugin);
    let hooks = Arc::new(HookDispatcher::new(plugins, config.hook_timeout));
    info!(plugins = ?hooks.plugins().names(), "STARTUP: Plugins registered");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => info!(signal = name, "SHUTDOWN: Signal received"),
            Err(e) => {
                error!(error = %e, "Signal handling unavailable");
                return;
            }
        }
        let _ = signal_tx.send(true);
    });

    let listener = TcpListener::bind(config.metrics_addr)
        .await
        .with_context(|| format!("binding metrics endpoint {}", config.metrics_addr))?;
    let server = Arc::new(MetricsServer::new(registry.clone(), Arc::clone(&hooks)));
    let server_task = tokio::spawn(server.run(listener, shutdown_rx.clone()));

    let scanner_task = tokio::spawn(run_holdover_scanner(
        Arc::clone(&tracker),
        config.holdover_scan,
        shutdown_rx.clone(),
    ));

    let mut supervisor = Supervisor::new(
        Arc::new(TokioLauncher),
        Arc::clone(&tracker),
        Arc::clone(&hooks),
        config.restart_backoff,
    );

    let mut watcher = ProfileWatcher::new(config.node_profile());
    let mut initial_rx = shutdown_rx.clone();
    let initial = wait_for_profile(&mut watcher, timing::PROFILE_WAIT, &mut initial_rx)
        .await
        .context("loading node profile")?;

    if let Some(profile) = initial {
        apply_profile(profile, &config.run_dir, &hooks, &mut supervisor)
            .await
            .context("applying node profile")?;

        run_reload_loop(
            watcher,
            config.update_interval,
            config.run_dir.clone(),
            Arc::clone(&hooks),
            &mut supervisor,
            shutdown_rx.clone(),
        )
        .await;
    }

    info!("SHUTDOWN: Stopping processes");
    supervisor.stop().await;

    let _ = shutdown_tx.send(true);
    for (name, task) in [("metrics endpoint", server_task), ("holdover scanner", scanner_task)] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }

    info!("SHUTDOWN: Complete");
    Ok(())
}
