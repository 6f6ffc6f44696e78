//! Link handles and per-link metrics.
//!
//! A [`LinkHandle`] is what the rest of the system holds: a name, an
//! outbound queue drained by the link's writer task, a connection-state
//! watch, and a metrics handle. The I/O tasks behind it live in
//! [`crate::tcp`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::{mpsc, watch};

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// Up and passing frames.
    Connected,
    /// Down; the reconnect loop is backing off.
    Reconnecting,
    /// Closed for good.
    Closed,
}

/// Per-link counters.
///
/// Strictly observational: consulted by diagnostics and the monitor role,
/// never by routing or forwarding.
#[derive(Debug, Default)]
pub struct LinkMetrics {
    tx_bytes: AtomicU64,
    tx_frames: AtomicU64,
    rx_bytes: AtomicU64,
    rx_frames: AtomicU64,
    dedup_drops: AtomicU64,
    last_tx_ts: AtomicU64,
    last_rx_ts: AtomicU64,
    connected_since_ts: AtomicU64,
}

/// Point-in-time copy of a link's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Bytes written to the wire.
    pub tx_bytes: u64,
    /// Frames written to the wire.
    pub tx_frames: u64,
    /// Bytes read off the wire.
    pub rx_bytes: u64,
    /// Frames read off the wire.
    pub rx_frames: u64,
    /// Frames from this link suppressed by the dedup cache.
    pub dedup_drops: u64,
    /// Unix time of the last transmit, 0 if never.
    pub last_tx_ts: u64,
    /// Unix time of the last receive, 0 if never.
    pub last_rx_ts: u64,
    /// Unix time the current connection came up, 0 if down.
    pub connected_since_ts: u64,
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

impl LinkMetrics {
    /// Record a transmitted frame.
    pub fn note_tx(&self, bytes: usize) {
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
        self.last_tx_ts.store(unix_now(), Ordering::Relaxed);
    }

    /// Record a received frame.
    pub fn note_rx(&self, bytes: usize) {
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
        self.last_rx_ts.store(unix_now(), Ordering::Relaxed);
    }

    /// Record a dedup suppression attributed to this link.
    pub fn note_dedup_drop(&self) {
        self.dedup_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the connection coming up or going down.
    pub fn note_connection(&self, up: bool) {
        self.connected_since_ts.store(if up { unix_now() } else { 0 }, Ordering::Relaxed);
    }

    /// Copy out the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            dedup_drops: self.dedup_drops.load(Ordering::Relaxed),
            last_tx_ts: self.last_tx_ts.load(Ordering::Relaxed),
            last_rx_ts: self.last_rx_ts.load(Ordering::Relaxed),
            connected_since_ts: self.connected_since_ts.load(Ordering::Relaxed),
        }
    }
}

/// Handle to one link.
///
/// Cloning is cheap; clones share the outbound queue and metrics.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    /// Link name, used to tag inbound frames and in every log line.
    pub name: String,
    /// Outbound frame queue, drained by the link's writer task.
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Connection state, updated by the link's I/O task.
    pub health: watch::Receiver<LinkHealth>,
    /// Shared counters.
    pub metrics: Arc<LinkMetrics>,
}

impl LinkHandle {
    /// Whether the link is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.health.borrow() == LinkHealth::Connected
    }
}
