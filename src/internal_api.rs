//! Internal HTTP API
//!
//! Liveness and metrics endpoints for orchestrators and scrapers. Nothing
//! here touches the datagram path; it only reads [`ProxyMetrics`].

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::InternalApiConfig;
use crate::metrics::ProxyMetrics;

/// Handle to the running API server
pub struct InternalApiHandle {
    addr: SocketAddr,
    graceful_timeout: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl InternalApiHandle {
    /// Address the API is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and wait for in-flight ones, bounded by the
    /// configured graceful shutdown timeout
    pub async fn shutdown(mut self) {
        info!("stopping internal API");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(self.graceful_timeout, &mut task)
                .await
                .is_err()
            {
                warn!("internal API did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for InternalApiHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Bind `addr` and serve the enabled endpoints in the background
pub async fn start_internal_api(
    addr: SocketAddr,
    config: &InternalApiConfig,
    metrics: ProxyMetrics,
) -> std::io::Result<InternalApiHandle> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let app = build_router(config, metrics);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            warn!(error = %e, "internal API server failed");
        }
    });

    info!(%addr, "started internal API");

    Ok(InternalApiHandle {
        addr,
        graceful_timeout: config.graceful_shutdown_timeout(),
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

fn build_router(config: &InternalApiConfig, metrics: ProxyMetrics) -> Router {
    let mut router = Router::new();
    if config.healthcheck {
        info!("adding healthcheck handler to internal API");
        router = router
            .route("/health", get(health))
            .route("/healthz", get(health));
    }
    if config.metrics {
        info!("adding metrics handler to internal API");
        router = router.route("/metrics", get(render_metrics));
    }
    router.with_state(metrics)
}

async fn health() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], "OK")
}

async fn render_metrics(State(metrics): State<ProxyMetrics>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render_prometheus(),
    )
}
