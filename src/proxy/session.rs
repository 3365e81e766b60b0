//! Backend sessions
//!
//! A session owns one UDP socket connected to one backend and a pump task
//! that relays everything the backend sends back to the flow's client
//! through the shared inbound socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::flow::FlowKey;
use super::table::SessionTable;
use crate::error::ProxyError;
use crate::helper::{resolve_addr, unspecified_for};
use crate::metrics::{CloseReason, DropReason};

/// One live client/backend flow
pub struct BackendSession {
    key: FlowKey,
    socket: UdpSocket,
    backend_addr: SocketAddr,
    opened_at: Instant,
    /// Nanoseconds after `opened_at` of the last datagram in either direction
    last_activity: AtomicU64,
    closed: AtomicBool,
    close_notify: Notify,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BackendSession {
    /// Resolve the flow's backend and open a socket connected to it.
    ///
    /// The outbound pump is not started here; see [`spawn_outbound_pump`].
    pub async fn open(key: FlowKey) -> Result<Arc<Self>, ProxyError> {
        let create_err = |reason: String| ProxyError::SessionCreate {
            backend: key.backend().to_string(),
            reason,
        };

        let backend_addr = resolve_addr(key.backend())
            .await
            .map_err(|e| create_err(e.to_string()))?;

        let socket = UdpSocket::bind(unspecified_for(&backend_addr))
            .await
            .map_err(|e| create_err(format!("bind failed: {}", e)))?;
        socket
            .connect(backend_addr)
            .await
            .map_err(|e| create_err(format!("connect to {} failed: {}", backend_addr, e)))?;

        Ok(Arc::new(BackendSession {
            key,
            socket,
            backend_addr,
            opened_at: Instant::now(),
            last_activity: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            pump: Mutex::new(None),
        }))
    }

    /// Flow this session serves
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// Resolved backend address
    pub fn backend_addr(&self) -> SocketAddr {
        self.backend_addr
    }

    /// Local address of the backend-facing socket
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Record activity now
    pub fn touch(&self) {
        let elapsed = self.opened_at.elapsed().as_nanos() as u64;
        self.last_activity.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time of the last datagram in either direction
    pub fn last_activity(&self) -> Instant {
        self.opened_at + Duration::from_nanos(self.last_activity.load(Ordering::Relaxed))
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Forward a client payload to the backend
    pub async fn send(&self, payload: &[u8]) -> Result<usize, ProxyError> {
        if self.is_closed() {
            return Err(ProxyError::SessionClosed);
        }
        Ok(self.socket.send(payload).await?)
    }

    /// Mark the session closed and wake its pump.
    ///
    /// Returns `false` if it was already closed. The socket itself is released
    /// once the pump and the table have both dropped their references.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_notify.notify_one();
        true
    }

    fn attach_pump(&self, handle: JoinHandle<()>) {
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Take the pump's join handle, if still held
    pub fn take_pump(&self) -> Option<JoinHandle<()>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("key", &self.key)
            .field("backend_addr", &self.backend_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Start the backend-to-client pump for `session`
pub(crate) fn spawn_outbound_pump(
    session: Arc<BackendSession>,
    table: SessionTable,
    buffer_size: usize,
) {
    let handle = tokio::spawn(run_outbound_pump(session.clone(), table, buffer_size));
    session.attach_pump(handle);
}

/// Relay backend datagrams to the client until the session is closed or the
/// backend socket fails. A read failure tears the session down.
async fn run_outbound_pump(session: Arc<BackendSession>, table: SessionTable, buffer_size: usize) {
    let client = session.key.client();
    let inbound = table.inbound().clone();
    let metrics = table.metrics().clone();
    let mut buf = vec![0u8; buffer_size + 1];

    loop {
        if session.is_closed() {
            break;
        }

        tokio::select! {
            biased;
            _ = session.close_notify.notified() => break,
            recv = session.socket.recv(&mut buf) => match recv {
                Ok(n) if n > buffer_size => {
                    session.touch();
                    metrics.record_drop(DropReason::TooLarge);
                    warn!(flow = %session.key, capacity = buffer_size, "backend datagram too large, dropped");
                }
                Ok(n) => {
                    session.touch();
                    match inbound.send_to(&buf[..n], client).await {
                        Ok(_) => {
                            metrics.record_outbound(n);
                            trace!(flow = %session.key, bytes = n, "relayed to client");
                        }
                        Err(e) => {
                            metrics.record_drop(DropReason::ClientWrite);
                            warn!(flow = %session.key, error = %e, "failed to relay datagram to client");
                        }
                    }
                }
                Err(e) => {
                    debug!(flow = %session.key, error = %e, "backend read failed, closing session");
                    table.remove_session(&session, CloseReason::BackendRead);
                    break;
                }
            },
        }
    }

    debug!(flow = %session.key, "outbound pump terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_session() {
        let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();
        let key = FlowKey::new("127.0.0.1:40000".parse().unwrap(), backend_addr.to_string());

        let session = BackendSession::open(key.clone()).await.unwrap();
        assert_eq!(session.key(), &key);
        assert_eq!(session.backend_addr(), backend_addr);
        assert!(!session.is_closed());

        session.send(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = backend.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, session.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_open_session_unresolvable() {
        let key = FlowKey::new("127.0.0.1:40000".parse().unwrap(), "no-port-here");
        let err = BackendSession::open(key).await.unwrap_err();
        assert!(matches!(err, ProxyError::SessionCreate { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let key = FlowKey::new("127.0.0.1:40000".parse().unwrap(), "127.0.0.1:9");
        let session = BackendSession::open(key).await.unwrap();

        assert!(session.close());
        assert!(!session.close());
        assert!(session.is_closed());
        assert!(matches!(
            session.send(b"late").await,
            Err(ProxyError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_touch_moves_last_activity_forward() {
        let key = FlowKey::new("127.0.0.1:40000".parse().unwrap(), "127.0.0.1:9");
        let session = BackendSession::open(key).await.unwrap();

        let first = session.last_activity();
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.touch();
        assert!(session.last_activity() > first);
    }
}
