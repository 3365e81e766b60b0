//! Session table
//!
//! Concurrent map from [`FlowKey`] to [`BackendSession`]. Each key holds a
//! slot that is initialised at most once, so concurrent first datagrams for
//! the same flow all end up sharing the single session that wins creation.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::debug;

use super::flow::FlowKey;
use super::session::{spawn_outbound_pump, BackendSession};
use crate::error::ProxyError;
use crate::metrics::{CloseReason, ProxyMetrics};

type Slot = Arc<OnceCell<Arc<BackendSession>>>;

/// Shared handle to the session table
#[derive(Clone)]
pub struct SessionTable {
    inner: Arc<TableInner>,
}

struct TableInner {
    sessions: DashMap<FlowKey, Slot>,
    /// Client-facing socket the outbound pumps reply through
    inbound: Arc<UdpSocket>,
    metrics: ProxyMetrics,
    buffer_size: usize,
}

impl SessionTable {
    /// Create an empty table whose sessions reply through `inbound`
    pub fn new(inbound: Arc<UdpSocket>, metrics: ProxyMetrics, buffer_size: usize) -> Self {
        SessionTable {
            inner: Arc::new(TableInner {
                sessions: DashMap::new(),
                inbound,
                metrics,
                buffer_size,
            }),
        }
    }

    pub(crate) fn inbound(&self) -> &Arc<UdpSocket> {
        &self.inner.inbound
    }

    pub(crate) fn metrics(&self) -> &ProxyMetrics {
        &self.inner.metrics
    }

    /// Return the live session for `key`, creating it if absent.
    ///
    /// Creation opens the backend socket and starts the outbound pump. When
    /// several callers race on a new key exactly one creation runs; the others
    /// wait for it and share the result. A failed creation leaves no entry
    /// behind, so the next datagram retries from scratch.
    pub async fn get_or_create(&self, key: &FlowKey) -> Result<Arc<BackendSession>, ProxyError> {
        loop {
            let slot = self.slot(key);

            let session = match slot.get_or_try_init(|| self.create(key)).await {
                Ok(session) => session.clone(),
                Err(e) => {
                    self.inner
                        .sessions
                        .remove_if(key, |_, s| Arc::ptr_eq(s, &slot) && !s.initialized());
                    return Err(e);
                }
            };

            if !session.is_closed() {
                session.touch();
                return Ok(session);
            }

            // Raced with a removal; the slot is stale.
            self.inner
                .sessions
                .remove_if(key, |_, s| Arc::ptr_eq(s, &slot));
        }
    }

    fn slot(&self, key: &FlowKey) -> Slot {
        let existing = self.inner.sessions.get(key).map(|s| s.value().clone());
        match existing {
            Some(slot) => slot,
            None => self
                .inner
                .sessions
                .entry(key.clone())
                .or_default()
                .value()
                .clone(),
        }
    }

    async fn create(&self, key: &FlowKey) -> Result<Arc<BackendSession>, ProxyError> {
        let session = BackendSession::open(key.clone()).await?;
        spawn_outbound_pump(session.clone(), self.clone(), self.inner.buffer_size);
        self.inner.metrics.session_opened();
        debug!(flow = %key, backend = %session.backend_addr(), "session created");
        Ok(session)
    }

    /// Look up a live session without creating one
    pub fn get(&self, key: &FlowKey) -> Option<Arc<BackendSession>> {
        self.inner
            .sessions
            .get(key)
            .and_then(|slot| slot.value().get().cloned())
    }

    /// Refresh the activity timestamp of `key`; no-op if absent
    pub fn touch(&self, key: &FlowKey) {
        if let Some(session) = self.get(key) {
            session.touch();
        }
    }

    /// Remove and close the session for `key`.
    ///
    /// Idempotent: returns `false` when there was nothing live to close.
    pub fn remove_and_close(&self, key: &FlowKey, reason: CloseReason) -> bool {
        match self
            .inner
            .sessions
            .remove_if(key, |_, slot| slot.initialized())
        {
            Some((_, slot)) => match slot.get() {
                Some(session) => self.close_session(session, reason),
                None => false,
            },
            None => false,
        }
    }

    /// Remove and close `key` only if it has been idle since before `cutoff`.
    ///
    /// The check and the removal happen under the same shard lock, so a flow
    /// refreshed after the reaper's snapshot survives.
    pub fn evict_if_idle(&self, key: &FlowKey, cutoff: Instant) -> bool {
        let removed = self.inner.sessions.remove_if(key, |_, slot| {
            slot.get().map_or(false, |s| s.last_activity() < cutoff)
        });
        match removed.as_ref().and_then(|(_, slot)| slot.get()) {
            Some(session) => self.close_session(session, CloseReason::Idle),
            None => false,
        }
    }

    /// Remove `session` only if it is still the entry for its key, then close it
    pub fn remove_session(&self, session: &Arc<BackendSession>, reason: CloseReason) -> bool {
        self.inner.sessions.remove_if(session.key(), |_, slot| {
            slot.get().map_or(false, |s| Arc::ptr_eq(s, session))
        });
        self.close_session(session, reason)
    }

    fn close_session(&self, session: &BackendSession, reason: CloseReason) -> bool {
        if !session.close() {
            return false;
        }
        self.inner.metrics.session_closed(reason);
        debug!(flow = %session.key(), reason = reason.as_str(), "session closed");
        true
    }

    /// Copy of every live flow and its last activity.
    ///
    /// Shard locks are held only while copying, never while the caller acts
    /// on the result.
    pub fn snapshot(&self) -> Vec<(FlowKey, Instant)> {
        self.inner
            .sessions
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .get()
                    .map(|s| (entry.key().clone(), s.last_activity()))
            })
            .collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Whether the table holds no live session
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session and hand back their pump handles
    pub fn close_all(&self, reason: CloseReason) -> Vec<JoinHandle<()>> {
        let keys: Vec<FlowKey> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut pumps = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, slot)) = self.inner.sessions.remove(&key) {
                if let Some(session) = slot.get() {
                    self.close_session(session, reason);
                    pumps.extend(session.take_pump());
                }
            }
        }
        pumps
    }
}
