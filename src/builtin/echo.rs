//! Echo and keep-alive services

use crate::broker::{timestamp_micros, ClientId, StreamBroker};
use crate::buffer::Buffer;
use crate::registry::{Service, ServiceHandler};

/// Sends every piece of client data back to its sender
pub struct EchoService;

impl ServiceHandler for EchoService {
    fn on_client_data(
        &self,
        broker: &StreamBroker,
        service: &Service,
        client: ClientId,
        _timestamp_us: u64,
        payload: &[u8],
    ) {
        let buffer = match Buffer::from_slice(payload) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(service = %service.id(), client = %client, error = %e, "Echo failed");
                return;
            }
        };

        if let Err(e) =
            broker.publish_to_client(service.id(), client, timestamp_micros(), &buffer)
        {
            tracing::debug!(service = %service.id(), client = %client, error = %e, "Echo not sent");
        }
    }
}

/// Accepts client data as a heartbeat and never answers
pub struct AliveService;

impl ServiceHandler for AliveService {}
