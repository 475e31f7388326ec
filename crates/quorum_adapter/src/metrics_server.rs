#![forbid(unsafe_code)]

use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use tokio::task::JoinHandle;
use tracing::{error, info};

use quorum_os::DaoMetrics;

pub fn metrics_router(metrics: DaoMetrics) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<DaoMetrics>) -> (StatusCode, String) {
    match metrics.encode_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            error!(error = %err, "unable to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// Binds before returning so a taken port fails startup rather than the task.
pub async fn spawn_metrics_server(
    addr: SocketAddr,
    metrics: DaoMetrics,
) -> std::io::Result<JoinHandle<std::io::Result<()>>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics listening on /metrics");
    Ok(tokio::spawn(async move {
        axum::serve(listener, metrics_router(metrics)).await
    }))
}
