//! Proxy engine lifecycle
//!
//! Binds the client-facing listener, starts the inbound pump and the idle
//! reaper, and tears everything down again on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::classifier::{classifier_from_config, Classifier};
use super::inbound::InboundPump;
use super::reaper::IdleReaper;
use super::table::SessionTable;
use crate::config::{Config, ProxyConfig};
use crate::error::ProxyError;
use crate::helper::{bind_udp, resolve_addr};
use crate::internal_api::start_internal_api;
use crate::metrics::{CloseReason, ProxyMetrics};

/// A bound but not yet running proxy
pub struct Proxy {
    config: ProxyConfig,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    table: SessionTable,
    classifier: Arc<dyn Classifier>,
    metrics: ProxyMetrics,
}

impl Proxy {
    /// Validate `config` and bind the listener.
    ///
    /// Failing to bind is fatal and is the caller's to report.
    pub async fn bind(
        config: ProxyConfig,
        classifier: Arc<dyn Classifier>,
        metrics: ProxyMetrics,
    ) -> Result<Self, ProxyError> {
        config.validate().map_err(ProxyError::Config)?;

        let addr = resolve_addr(&config.listen_addr).await?;
        let socket = bind_udp(addr, config.listener_opts())
            .map_err(|e| ProxyError::Listener(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let table = SessionTable::new(socket.clone(), metrics.clone(), config.buffer_size);

        Ok(Proxy {
            config,
            socket,
            local_addr,
            table,
            classifier,
            metrics,
        })
    }

    /// Address clients send to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The session table
    pub fn sessions(&self) -> &SessionTable {
        &self.table
    }

    /// Spawn the inbound pump and the idle reaper
    pub fn start(self) -> ProxyHandle {
        let (shutdown_tx, _) = broadcast::channel(1);

        let inbound = InboundPump::new(
            self.socket,
            self.table.clone(),
            self.classifier,
            self.metrics.clone(),
            self.config.buffer_size,
            self.config.max_consecutive_read_errors,
        );
        let inbound = tokio::spawn(inbound.run(shutdown_tx.subscribe()));

        let reaper = IdleReaper::new(
            self.table.clone(),
            self.config.idle_timeout(),
            self.config.reaper_interval(),
        );
        let reaper = tokio::spawn(reaper.run(shutdown_tx.subscribe()));

        info!(
            listen = %self.local_addr,
            buffer_size = self.config.buffer_size,
            idle_timeout_secs = self.config.idle_timeout,
            "proxy started"
        );

        ProxyHandle {
            local_addr: self.local_addr,
            table: self.table,
            metrics: self.metrics,
            shutdown_tx,
            inbound: Some(inbound),
            reaper: Some(reaper),
        }
    }
}

/// Handle to a running proxy
pub struct ProxyHandle {
    local_addr: SocketAddr,
    table: SessionTable,
    metrics: ProxyMetrics,
    shutdown_tx: broadcast::Sender<()>,
    inbound: Option<JoinHandle<Result<(), ProxyError>>>,
    reaper: Option<JoinHandle<()>>,
}

impl ProxyHandle {
    /// Address clients send to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The session table
    pub fn sessions(&self) -> &SessionTable {
        &self.table
    }

    /// Counters shared with the internal API
    pub fn metrics(&self) -> &ProxyMetrics {
        &self.metrics
    }

    /// Resolve when the inbound pump exits on its own, yielding its error.
    ///
    /// Returns immediately once the pump has already been awaited.
    pub async fn wait(&mut self) -> Result<(), ProxyError> {
        match self.inbound.as_mut() {
            Some(task) => {
                let result = join_result(task.await);
                self.inbound = None;
                result
            }
            None => Ok(()),
        }
    }

    /// Stop both tasks, close every session and wait for all pumps to exit
    pub async fn stop(mut self) -> Result<(), ProxyError> {
        let _ = self.shutdown_tx.send(());

        let result = match self.inbound.take() {
            Some(task) => join_result(task.await),
            None => Ok(()),
        };
        if let Some(task) = self.reaper.take() {
            let _ = task.await;
        }

        let pumps = self.table.close_all(CloseReason::Shutdown);
        let closed = pumps.len();
        futures::future::join_all(pumps).await;

        info!(closed_sessions = closed, "proxy stopped");
        result
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if self.inbound.is_some() || self.reaper.is_some() {
            self.table.close_all(CloseReason::Shutdown);
        }
    }
}

fn join_result(
    joined: std::result::Result<Result<(), ProxyError>, tokio::task::JoinError>,
) -> Result<(), ProxyError> {
    joined.unwrap_or_else(|e| Err(ProxyError::Listener(format!("inbound task failed: {}", e))))
}

/// Run the proxy and its internal API until shutdown or a fatal listener error
pub async fn run_proxy(config: Config, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    config.validate()?;

    let metrics = ProxyMetrics::new();
    let classifier = classifier_from_config(&config.proxy);

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.internal_api.port));
    let api = start_internal_api(api_addr, &config.internal_api, metrics.clone())
        .await
        .with_context(|| format!("Failed to start internal API on {}", api_addr))?;

    let proxy = Proxy::bind(config.proxy.clone(), classifier, metrics)
        .await
        .with_context(|| format!("Failed to bind proxy on {}", config.proxy.listen_addr))?;
    let mut handle = proxy.start();

    let outcome = tokio::select! {
        result = handle.wait() => {
            if let Err(e) = &result {
                error!("Proxy listener failed: {:#}", e);
            }
            result
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received, stopping proxy");
            Ok(())
        }
    };

    let stopped = handle.stop().await;
    api.shutdown().await;

    outcome?;
    stopped?;
    Ok(())
}
