//! Proxy metrics
//!
//! Counters and gauges updated by the engine and read by the internal API.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Why a datagram was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Larger than the configured buffer
    TooLarge,
    /// The classifier rejected it
    Classification,
    /// No backend session could be opened for it
    SessionCreate,
    /// Sending to the backend failed
    BackendWrite,
    /// Sending a backend response to the client failed
    ClientWrite,
}

impl DropReason {
    const ALL: [DropReason; 5] = [
        DropReason::TooLarge,
        DropReason::Classification,
        DropReason::SessionCreate,
        DropReason::BackendWrite,
        DropReason::ClientWrite,
    ];

    /// Label value used in the metrics output
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::TooLarge => "too_large",
            DropReason::Classification => "classification",
            DropReason::SessionCreate => "session_create",
            DropReason::BackendWrite => "backend_write",
            DropReason::ClientWrite => "client_write",
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Evicted by the idle reaper
    Idle,
    /// The backend socket failed on read
    BackendRead,
    /// The backend socket failed on write
    BackendWrite,
    /// Engine shutdown
    Shutdown,
    /// Explicit removal through the table API
    Manual,
}

impl CloseReason {
    const ALL: [CloseReason; 5] = [
        CloseReason::Idle,
        CloseReason::BackendRead,
        CloseReason::BackendWrite,
        CloseReason::Shutdown,
        CloseReason::Manual,
    ];

    /// Label value used in the metrics output
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Idle => "idle",
            CloseReason::BackendRead => "backend_read",
            CloseReason::BackendWrite => "backend_write",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Manual => "manual",
        }
    }
}

/// Shared metrics handle
#[derive(Clone, Default)]
pub struct ProxyMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    packets_in_total: AtomicU64,
    bytes_in_total: AtomicU64,
    packets_out_total: AtomicU64,
    bytes_out_total: AtomicU64,

    sessions_active: AtomicU64,
    sessions_created_total: AtomicU64,
    sessions_closed: [AtomicU64; 5],

    dropped: [AtomicU64; 5],
    read_errors_total: AtomicU64,
}

/// Point-in-time copy of the metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Datagrams forwarded client to backend
    pub packets_in_total: u64,
    /// Bytes forwarded client to backend
    pub bytes_in_total: u64,
    /// Datagrams forwarded backend to client
    pub packets_out_total: u64,
    /// Bytes forwarded backend to client
    pub bytes_out_total: u64,
    /// Sessions currently open
    pub sessions_active: u64,
    /// Sessions opened since start
    pub sessions_created_total: u64,
    /// Listener read errors
    pub read_errors_total: u64,
    sessions_closed: [u64; 5],
    dropped: [u64; 5],
}

impl MetricsSnapshot {
    /// Sessions closed for `reason`
    pub fn sessions_closed(&self, reason: CloseReason) -> u64 {
        self.sessions_closed[reason as usize]
    }

    /// Sessions closed for any reason
    pub fn sessions_closed_total(&self) -> u64 {
        self.sessions_closed.iter().sum()
    }

    /// Datagrams dropped for `reason`
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped[reason as usize]
    }
}

impl ProxyMetrics {
    /// Create a zeroed metrics handle
    pub fn new() -> Self {
        Self::default()
    }

    /// A client datagram was forwarded to its backend
    pub fn record_inbound(&self, bytes: usize) {
        self.inner.packets_in_total.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_in_total
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A backend datagram was relayed to its client
    pub fn record_outbound(&self, bytes: usize) {
        self.inner.packets_out_total.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_out_total
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A backend session was opened
    pub fn session_opened(&self) {
        self.inner
            .sessions_created_total
            .fetch_add(1, Ordering::Relaxed);
        self.inner.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// A backend session was closed for `reason`
    pub fn session_closed(&self, reason: CloseReason) {
        self.inner.sessions_closed[reason as usize].fetch_add(1, Ordering::Relaxed);
        // Never wraps below zero even if a close is reported twice.
        let _ = self.inner.sessions_active.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| n.checked_sub(1),
        );
    }

    /// A datagram was dropped for `reason`
    pub fn record_drop(&self, reason: DropReason) {
        self.inner.dropped[reason as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// The listener failed a read
    pub fn record_read_error(&self) {
        self.inner.read_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of live sessions
    pub fn sessions_active(&self) -> u64 {
        self.inner.sessions_active.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            packets_in_total: load(&self.inner.packets_in_total),
            bytes_in_total: load(&self.inner.bytes_in_total),
            packets_out_total: load(&self.inner.packets_out_total),
            bytes_out_total: load(&self.inner.bytes_out_total),
            sessions_active: load(&self.inner.sessions_active),
            sessions_created_total: load(&self.inner.sessions_created_total),
            read_errors_total: load(&self.inner.read_errors_total),
            sessions_closed: std::array::from_fn(|i| load(&self.inner.sessions_closed[i])),
            dropped: std::array::from_fn(|i| load(&self.inner.dropped[i])),
        }
    }

    /// Render in the Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();

        push_counter(&mut out, "udpgate_packets_in_total", snap.packets_in_total);
        push_counter(&mut out, "udpgate_bytes_in_total", snap.bytes_in_total);
        push_counter(&mut out, "udpgate_packets_out_total", snap.packets_out_total);
        push_counter(&mut out, "udpgate_bytes_out_total", snap.bytes_out_total);

        push_gauge(&mut out, "udpgate_sessions_active", snap.sessions_active);
        push_counter(
            &mut out,
            "udpgate_sessions_created_total",
            snap.sessions_created_total,
        );

        let _ = writeln!(out, "# TYPE udpgate_sessions_closed_total counter");
        for reason in CloseReason::ALL {
            let _ = writeln!(
                out,
                "udpgate_sessions_closed_total{{reason=\"{}\"}} {}",
                reason.as_str(),
                snap.sessions_closed(reason)
            );
        }

        let _ = writeln!(out, "# TYPE udpgate_dropped_total counter");
        for reason in DropReason::ALL {
            let _ = writeln!(
                out,
                "udpgate_dropped_total{{reason=\"{}\"}} {}",
                reason.as_str(),
                snap.dropped(reason)
            );
        }

        push_counter(&mut out, "udpgate_read_errors_total", snap.read_errors_total);
        out
    }
}

fn push_counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn push_gauge(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let snapshot = ProxyMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[test]
    fn test_record_traffic() {
        let metrics = ProxyMetrics::new();
        metrics.record_inbound(100);
        metrics.record_inbound(50);
        metrics.record_outbound(20);

        let snap = metrics.snapshot();
        assert_eq!(snap.packets_in_total, 2);
        assert_eq!(snap.bytes_in_total, 150);
        assert_eq!(snap.packets_out_total, 1);
        assert_eq!(snap.bytes_out_total, 20);
    }

    #[test]
    fn test_session_gauge() {
        let metrics = ProxyMetrics::new();
        metrics.session_opened();
        metrics.session_opened();
        assert_eq!(metrics.sessions_active(), 2);

        metrics.session_closed(CloseReason::Idle);
        metrics.session_closed(CloseReason::BackendRead);
        metrics.session_closed(CloseReason::BackendRead);
        assert_eq!(metrics.sessions_active(), 0);

        let snap = metrics.snapshot();
        assert_eq!(snap.sessions_created_total, 2);
        assert_eq!(snap.sessions_closed(CloseReason::Idle), 1);
        assert_eq!(snap.sessions_closed(CloseReason::BackendRead), 2);
        assert_eq!(snap.sessions_closed_total(), 3);
    }

    #[test]
    fn test_drops_by_reason() {
        let metrics = ProxyMetrics::new();
        metrics.record_drop(DropReason::TooLarge);
        metrics.record_drop(DropReason::TooLarge);
        metrics.record_drop(DropReason::Classification);

        let snap = metrics.snapshot();
        assert_eq!(snap.dropped(DropReason::TooLarge), 2);
        assert_eq!(snap.dropped(DropReason::Classification), 1);
        assert_eq!(snap.dropped(DropReason::ClientWrite), 0);
    }

    #[test]
    fn test_clone_shares_state() {
        let metrics = ProxyMetrics::new();
        let other = metrics.clone();
        other.record_read_error();
        assert_eq!(metrics.snapshot().read_errors_total, 1);
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = ProxyMetrics::new();
        metrics.session_opened();
        metrics.record_inbound(10);
        metrics.record_drop(DropReason::SessionCreate);

        let text = metrics.render_prometheus();
        assert!(text.contains("# TYPE udpgate_sessions_active gauge\nudpgate_sessions_active 1\n"));
        assert!(text.contains("udpgate_packets_in_total 1\n"));
        assert!(text.contains("udpgate_bytes_in_total 10\n"));
        assert!(text.contains("udpgate_dropped_total{reason=\"session_create\"} 1\n"));
        assert!(text.contains("udpgate_sessions_closed_total{reason=\"idle\"} 0\n"));
    }
}
