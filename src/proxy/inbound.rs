//! Inbound pump
//!
//! Single reader on the client-facing socket. Every datagram is classified,
//! mapped to its session and written to that session's backend socket.
//! Per-datagram failures are counted and logged; the loop keeps going.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use super::classifier::Classifier;
use super::flow::FlowKey;
use super::session::BackendSession;
use super::table::SessionTable;
use crate::error::ProxyError;
use crate::metrics::{CloseReason, DropReason, ProxyMetrics};

/// Client-to-backend forwarding loop
pub struct InboundPump {
    socket: Arc<UdpSocket>,
    table: SessionTable,
    classifier: Arc<dyn Classifier>,
    metrics: ProxyMetrics,
    buffer_size: usize,
    max_consecutive_read_errors: u32,
}

impl InboundPump {
    /// Create a pump reading from `socket`
    pub fn new(
        socket: Arc<UdpSocket>,
        table: SessionTable,
        classifier: Arc<dyn Classifier>,
        metrics: ProxyMetrics,
        buffer_size: usize,
        max_consecutive_read_errors: u32,
    ) -> Self {
        InboundPump {
            socket,
            table,
            classifier,
            metrics,
            buffer_size,
            max_consecutive_read_errors,
        }
    }

    /// Read and forward until shutdown.
    ///
    /// Returns an error only when the listener keeps failing, i.e.
    /// `max_consecutive_read_errors` reads in a row error out.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), ProxyError> {
        // One spare byte so an oversized datagram is detectable.
        let mut buf = vec![0u8; self.buffer_size + 1];
        let mut consecutive_errors = 0u32;

        loop {
            let (n, client) = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("inbound pump stopping");
                    return Ok(());
                }
                recv = self.socket.recv_from(&mut buf) => match recv {
                    Ok(received) => {
                        consecutive_errors = 0;
                        received
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        self.metrics.record_read_error();
                        warn!(error = %e, consecutive_errors, "inbound read failed");
                        if consecutive_errors >= self.max_consecutive_read_errors {
                            error!(error = %e, "inbound listener keeps failing, giving up");
                            return Err(ProxyError::Listener(format!(
                                "{} consecutive read errors, last: {}",
                                consecutive_errors, e
                            )));
                        }
                        continue;
                    }
                }
            };

            if let Err(e) = self.forward(&buf[..n], client).await {
                self.record_failure(client, &e);
            }
        }
    }

    /// Forward one client datagram to its backend
    pub async fn forward(&self, datagram: &[u8], client: SocketAddr) -> Result<usize, ProxyError> {
        if datagram.len() > self.buffer_size {
            return Err(ProxyError::DatagramTooLarge {
                size: datagram.len(),
                capacity: self.buffer_size,
            });
        }

        let backend = self.classifier.classify(datagram)?;
        let key = FlowKey::new(client, backend);
        let session = self.table.get_or_create(&key).await?;

        match self.send_on(&session, datagram).await {
            Err(ProxyError::SessionClosed) => {
                // Closed by the reaper or the outbound pump since the lookup.
                debug!(flow = %key, "session closed before send, reopening");
                let session = self.table.get_or_create(&key).await?;
                self.send_on(&session, datagram).await
            }
            result => result,
        }
    }

    async fn send_on(
        &self,
        session: &Arc<BackendSession>,
        datagram: &[u8],
    ) -> Result<usize, ProxyError> {
        match session.send(datagram).await {
            Ok(sent) => {
                self.metrics.record_inbound(sent);
                trace!(flow = %session.key(), bytes = sent, "forwarded to backend");
                Ok(sent)
            }
            Err(e) => {
                // Drop the session so the flow's next datagram starts a fresh one.
                if e.is_session_fatal() {
                    self.table.remove_session(session, CloseReason::BackendWrite);
                }
                Err(e)
            }
        }
    }

    fn record_failure(&self, client: SocketAddr, err: &ProxyError) {
        let reason = drop_reason(err);
        self.metrics.record_drop(reason);
        match reason {
            DropReason::TooLarge | DropReason::Classification => {
                warn!(client = %client, error = %err, "dropped inbound datagram");
            }
            _ => {
                debug!(client = %client, error = %err, reason = reason.as_str(), "dropped inbound datagram");
            }
        }
    }
}

/// Metric bucket for a failed forward
fn drop_reason(err: &ProxyError) -> DropReason {
    match err {
        ProxyError::DatagramTooLarge { .. } => DropReason::TooLarge,
        ProxyError::Classification(_) => DropReason::Classification,
        // Still closed after reopening: no usable session was obtained.
        ProxyError::SessionCreate { .. } | ProxyError::Resolve(_) | ProxyError::SessionClosed => {
            DropReason::SessionCreate
        }
        _ => DropReason::BackendWrite,
    }
}
