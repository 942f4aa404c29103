//! Queued packets

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::buffer::Buffer;

/// Microseconds since the Unix epoch
pub fn timestamp_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// One timestamped buffer queued for one client
#[derive(Debug)]
pub struct Packet {
    /// Id of the service that produced it
    pub service: Arc<str>,
    /// Producer timestamp in microseconds
    pub timestamp_us: u64,
    /// The client's own duplicate of the published buffer
    pub buffer: Buffer,
}

impl Packet {
    pub fn new(service: Arc<str>, timestamp_us: u64, buffer: Buffer) -> Self {
        Self {
            service,
            timestamp_us,
            buffer,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Payload size in bytes
    pub fn len(&self) -> u64 {
        self.buffer.size()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
