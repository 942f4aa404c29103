//! Broker configuration

use std::fmt;
use std::time::Duration;

/// What to do when a client's queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest undelivered packet to make room
    #[default]
    DropOldest,
    /// Discard the packet being published
    DropNewest,
    /// Disconnect the client
    Disconnect,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropOldest => write!(f, "drop-oldest"),
            OverflowPolicy::DropNewest => write!(f, "drop-newest"),
            OverflowPolicy::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Configuration for the stream broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum packets queued per client
    pub queue_depth: usize,

    /// Policy applied when a publish would exceed `queue_depth`
    pub overflow_policy: OverflowPolicy,

    /// Disconnect clients silent for longer than this
    pub client_timeout: Duration,

    /// How often the liveness sweep runs
    pub sweep_interval: Duration,

    /// Number of sender worker tasks
    pub sender_workers: usize,

    /// Upper bound on transmitting one packet to one client
    pub send_timeout: Duration,

    /// Maximum attached clients across all transports (0 = unlimited)
    pub max_clients: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 50,
            overflow_policy: OverflowPolicy::DropOldest,
            client_timeout: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
            sender_workers: 2,
            send_timeout: Duration::from_secs(5),
            max_clients: 64,
        }
    }
}

impl BrokerConfig {
    /// Set the per-client queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Set the overflow policy
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Set the client inactivity timeout
    pub fn client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Set the liveness sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the number of sender workers
    pub fn sender_workers(mut self, workers: usize) -> Self {
        self.sender_workers = workers.max(1);
        self
    }

    /// Set the per-packet send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the client limit
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();

        assert_eq!(config.queue_depth, 50);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.client_timeout, Duration::from_secs(3));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.sender_workers, 2);
        assert_eq!(config.max_clients, 64);
    }

    #[test]
    fn test_builder_methods() {
        let config = BrokerConfig::default()
            .queue_depth(8)
            .overflow_policy(OverflowPolicy::Disconnect)
            .client_timeout(Duration::from_millis(500))
            .sweep_interval(Duration::from_millis(100))
            .sender_workers(4)
            .send_timeout(Duration::from_secs(1))
            .max_clients(0);

        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.overflow_policy, OverflowPolicy::Disconnect);
        assert_eq!(config.client_timeout, Duration::from_millis(500));
        assert_eq!(config.sweep_interval, Duration::from_millis(100));
        assert_eq!(config.sender_workers, 4);
        assert_eq!(config.send_timeout, Duration::from_secs(1));
        assert_eq!(config.max_clients, 0);
    }

    #[test]
    fn test_zero_values_clamped() {
        let config = BrokerConfig::default().queue_depth(0).sender_workers(0);
        assert_eq!(config.queue_depth, 1);
        assert_eq!(config.sender_workers, 1);
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(OverflowPolicy::DropOldest.to_string(), "drop-oldest");
        assert_eq!(OverflowPolicy::Disconnect.to_string(), "disconnect");
    }
}
