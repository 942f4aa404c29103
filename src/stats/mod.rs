//! Statistics for the data plane

pub mod metrics;

pub use metrics::{BrokerStats, StatsSnapshot};
