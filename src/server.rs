//! HTTP server exposing the Prometheus metrics.
//!
//! Serves the configured metrics path for Prometheus scraping, `/health`
//! for liveness checks and a small HTML info page on `/`.

use crate::error::{ExporterError, Result};
use crate::metrics::MetricsCollector;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state.
#[derive(Clone)]
struct AppState {
    metrics: Arc<MetricsCollector>,
    metrics_path: String,
    version: &'static str,
}

/// Start the HTTP server and block until shutdown.
pub async fn start_server(
    listen_address: &str,
    metrics_path: &str,
    version: &'static str,
    metrics: Arc<MetricsCollector>,
) -> Result<()> {
    let state = AppState {
        metrics,
        metrics_path: metrics_path.to_string(),
        version,
    };

    let app = Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting HTTP server on {listen_address}");

    let listener = TcpListener::bind(listen_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ExporterError::Server(e.to_string()))?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutting down...");
}

/// Handler for the metrics endpoint: run a fresh scrape, then encode.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    if let Err(e) = state.metrics.collect().await {
        // Still serve the body; pve_up carries the failure
        warn!("Failed to collect metrics: {e}");
    }

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
                .into_response()
        }
    }
}

/// Handler for /health.
async fn health_handler() -> Response {
    (StatusCode::OK, "OK\n").into_response()
}

/// Handler for the root info page.
async fn root_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<html>
<head><title>Proxmox VE Exporter</title></head>
<body>
<h1>Proxmox VE Exporter</h1>
<p>Version: {}</p>
<p><a href="{}">Metrics</a></p>
<p><a href="/health">Health</a></p>
</body>
</html>"#,
        state.version, state.metrics_path
    ))
}
