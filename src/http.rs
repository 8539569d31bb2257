//! Observability HTTP surface: `/metrics` for Prometheus scraping and
//! `/healthz` for liveness probes (spec.md §4.8 ambient operability).

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::str::FromStr;

async fn metrics_handler() -> String {
    crate::metrics::gather()
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Binds to `addr` and serves `/metrics` and `/healthz`. Long-running;
/// spawn as its own task.
pub async fn run_http_server(addr: &str) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler));

    let addr = match SocketAddr::from_str(addr) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(addr, error = %e, "invalid observability bind address");
            return;
        }
    };

    tracing::info!(%addr, "observability HTTP server listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind observability HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "observability HTTP server error");
    }
}
