//! Metrics and hardware-status endpoint
//!
//! `GET /metrics` serves the Prometheus text exposition of the daemon's
//! registry; `GET /hwstatus` serves the JSON records collected from every
//! plugin's hardware-status hook.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use lp_core::MetricsRegistry;

use crate::hooks::HookDispatcher;

/// Shared state of the endpoint
pub struct MetricsServer {
    registry: MetricsRegistry,
    hooks: Arc<HookDispatcher>,
}

impl MetricsServer {
    pub fn new(registry: MetricsRegistry, hooks: Arc<HookDispatcher>) -> Self {
        Self { registry, hooks }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/hwstatus", get(hwstatus_handler))
            .with_state(self)
    }

    /// Serve until `shutdown` flips, then let in-flight requests finish
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Metrics endpoint listening"),
            Err(e) => warn!(error = %e, "Metrics endpoint listening on unknown address"),
        }

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "Metrics endpoint failed");
        }
        info!("Metrics endpoint stopped");
    }
}

async fn metrics_handler(State(server): State<Arc<MetricsServer>>) -> Response {
    match server.registry.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn hwstatus_handler(State(server): State<Arc<MetricsServer>>) -> Response {
    Json(server.hooks.populate_hardware_status().await).into_response()
}
