//! Process-wide counters for connections and datagram handling

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::LazyLock;
use tickwire_core::ChannelStats;

/// Global metrics collector
#[derive(Debug, Default)]
pub struct GlobalMetrics {
    /// Total connections created
    pub connections_created: AtomicU64,
    /// Connections created and not yet closed
    pub active_connections: AtomicUsize,
    /// Datagram peers declared dead by the liveness check
    pub liveness_timeouts: AtomicU64,
    /// Datagrams dropped before reaching a connection
    pub datagrams_dropped: AtomicU64,
    /// Payload bytes sent by connections that have closed
    pub total_bytes_sent: AtomicU64,
    /// Payload bytes received by connections that have closed
    pub total_bytes_received: AtomicU64,
    /// Retransmissions by connections that have closed
    pub total_retransmissions: AtomicU64,
}

impl GlobalMetrics {
    /// Record a new connection
    pub fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closure
    pub fn connection_closed(&self) {
        // Saturate so an unbalanced close cannot wrap the gauge.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn liveness_timeout(&self) {
        self.liveness_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagram_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished channel's counters into the totals
    pub fn absorb(&self, stats: &ChannelStats) {
        self.total_bytes_sent
            .fetch_add(stats.bytes_sent, Ordering::Relaxed);
        self.total_bytes_received
            .fetch_add(stats.bytes_received, Ordering::Relaxed);
        self.total_retransmissions
            .fetch_add(stats.retransmissions, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            liveness_timeouts: self.liveness_timeouts.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            total_retransmissions: self.total_retransmissions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_created: u64,
    pub active_connections: usize,
    pub liveness_timeouts: u64,
    pub datagrams_dropped: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_retransmissions: u64,
}

static GLOBAL_METRICS: LazyLock<GlobalMetrics> = LazyLock::new(GlobalMetrics::default);

/// Get global metrics
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}

/// Format metrics for human-readable display
pub fn format_metrics(snapshot: &MetricsSnapshot) -> String {
    format!(
        "Transport Metrics:\n\
         Connections: {} created, {} active, {} timed out\n\
         Datagrams dropped: {}\n\
         Closed traffic: {} bytes sent, {} bytes received, {} retransmissions",
        snapshot.connections_created,
        snapshot.active_connections,
        snapshot.liveness_timeouts,
        snapshot.datagrams_dropped,
        snapshot.total_bytes_sent,
        snapshot.total_bytes_received,
        snapshot.total_retransmissions,
    )
}
