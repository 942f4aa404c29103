//! Broker counters
//!
//! Updated lock-free on the publish and send paths; the admin layer reads
//! them through [`BrokerStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::broker::DetachReason;

/// Live broker counters
#[derive(Debug)]
pub struct BrokerStats {
    started_at: Instant,
    publishes: AtomicU64,
    packets_queued: AtomicU64,
    packets_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    packets_evicted: AtomicU64,
    packets_dropped: AtomicU64,
    packets_released: AtomicU64,
    send_failures: AtomicU64,
    clients_attached: AtomicU64,
    clients_detached: AtomicU64,
    clients_timed_out: AtomicU64,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            publishes: AtomicU64::new(0),
            packets_queued: AtomicU64::new(0),
            packets_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            packets_evicted: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            packets_released: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            clients_attached: AtomicU64::new(0),
            clients_detached: AtomicU64::new(0),
            clients_timed_out: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_publish(&self) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.packets_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, bytes: u64) {
        self.packets_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self) {
        self.packets_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attach(&self) {
        self.clients_attached.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_detach(&self, reason: DetachReason, released: usize) {
        self.clients_detached.fetch_add(1, Ordering::Relaxed);
        self.packets_released
            .fetch_add(released as u64, Ordering::Relaxed);
        if reason == DetachReason::Timeout {
            self.clients_timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Time since the broker was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let attached = self.clients_attached.load(Ordering::Relaxed);
        let detached = self.clients_detached.load(Ordering::Relaxed);

        StatsSnapshot {
            uptime: self.uptime(),
            publishes: self.publishes.load(Ordering::Relaxed),
            packets_queued: self.packets_queued.load(Ordering::Relaxed),
            packets_delivered: self.packets_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            packets_evicted: self.packets_evicted.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_released: self.packets_released.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            clients_connected: attached.saturating_sub(detached),
            clients_timed_out: self.clients_timed_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for BrokerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the broker counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Time since the broker was created
    pub uptime: Duration,
    /// `publish` calls
    pub publishes: u64,
    /// Packets placed on client queues
    pub packets_queued: u64,
    /// Packets fully transmitted
    pub packets_delivered: u64,
    /// Payload bytes fully transmitted
    pub bytes_delivered: u64,
    /// Packets evicted under the drop-oldest policy
    pub packets_evicted: u64,
    /// Packets discarded under the drop-newest policy
    pub packets_dropped: u64,
    /// Packets still queued when their client was detached
    pub packets_released: u64,
    /// Packets whose transmission failed or timed out
    pub send_failures: u64,
    /// Clients currently attached
    pub clients_connected: u64,
    /// Clients detached by the liveness sweep
    pub clients_timed_out: u64,
}

impl StatsSnapshot {
    /// Average delivered throughput in bytes per second
    pub fn delivered_rate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            self.bytes_delivered / secs
        } else {
            0
        }
    }
}
