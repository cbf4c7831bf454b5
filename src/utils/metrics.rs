//! Observability and Metrics
//!
//! Per-node counters for connections, handshakes and message traffic.
//!
//! Uses atomic counters so the accept task, every connection task and the
//! caller's task can record without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector owned by a single node
#[derive(Debug)]
pub struct Metrics {
    /// Total connections registered (inbound + outbound)
    connections_total: AtomicU64,
    /// Connections currently registered
    connections_active: AtomicU64,
    /// Total handshake attempts
    handshakes_total: AtomicU64,
    /// Successful handshakes
    handshakes_success: AtomicU64,
    /// Failed handshakes
    handshakes_failed: AtomicU64,
    /// Total frames sent
    messages_sent: AtomicU64,
    /// Total frames received
    messages_received: AtomicU64,
    /// Total frame body bytes written, framing excluded
    bytes_sent: AtomicU64,
    /// Total frame body bytes decoded, framing excluded
    bytes_received: AtomicU64,
    /// Socket faults (read, write or connect failures)
    connection_errors: AtomicU64,
    /// Encoding faults and oversized frames
    protocol_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a connection entering a registry
    pub fn connection_established(&self) {
        bump(&self.connections_total, 1);
        bump(&self.connections_active, 1);
    }

    /// Record a connection leaving a registry
    pub fn connection_closed(&self) {
        // Saturates at zero.
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Record a handshake attempt
    pub fn handshake_attempt(&self) {
        bump(&self.handshakes_total, 1);
    }

    /// Record a successful handshake
    pub fn handshake_success(&self) {
        bump(&self.handshakes_success, 1);
    }

    /// Record a failed handshake
    pub fn handshake_failed(&self) {
        bump(&self.handshakes_failed, 1);
    }

    /// Record a frame sent
    pub fn message_sent(&self, byte_count: u64) {
        bump(&self.messages_sent, 1);
        bump(&self.bytes_sent, byte_count);
    }

    /// Record a frame received
    pub fn message_received(&self, byte_count: u64) {
        bump(&self.messages_received, 1);
        bump(&self.bytes_received, byte_count);
    }

    /// Record a socket fault
    pub fn connection_error(&self) {
        bump(&self.connection_errors, 1);
    }

    /// Record an encoding fault or a rejected frame
    pub fn protocol_error(&self) {
        bump(&self.protocol_errors, 1);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: read(&self.connections_total),
            connections_active: read(&self.connections_active),
            handshakes_total: read(&self.handshakes_total),
            handshakes_success: read(&self.handshakes_success),
            handshakes_failed: read(&self.handshakes_failed),
            messages_sent: read(&self.messages_sent),
            messages_received: read(&self.messages_received),
            bytes_sent: read(&self.bytes_sent),
            bytes_received: read(&self.bytes_received),
            connection_errors: read(&self.connection_errors),
            protocol_errors: read(&self.protocol_errors),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self, node_id: &str) {
        let snapshot = self.snapshot();
        info!(
            node_id,
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            connection_errors = snapshot.connection_errors,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Node metrics snapshot"
        );
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connection_errors: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
    }

    #[test]
    fn test_active_never_underflows() {
        let metrics = Metrics::new();
        metrics.connection_closed();
        assert_eq!(metrics.snapshot().connections_active, 0);
    }

    #[test]
    fn test_message_bytes() {
        let metrics = Metrics::new();
        metrics.message_sent(5);
        metrics.message_sent(7);
        metrics.message_received(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.bytes_sent, 12);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.bytes_received, 3);
    }
}
