//! `__list` service
//!
//! Text commands sent as client data:
//!
//! ```text
//! list          reply with the <servicelist> document
//! start=<id>    subscribe to <id>
//! stop=<id>     unsubscribe, if subscribed to <id>
//! ```

use crate::broker::{timestamp_micros, ClientId, StreamBroker};
use crate::buffer::Buffer;
use crate::registry::{Service, ServiceHandler};

const CMD_LIST: &str = "list";
const CMD_START: &str = "start=";
const CMD_STOP: &str = "stop=";

pub struct ListService;

impl ServiceHandler for ListService {
    fn on_client_data(
        &self,
        broker: &StreamBroker,
        service: &Service,
        client: ClientId,
        _timestamp_us: u64,
        payload: &[u8],
    ) {
        let command = String::from_utf8_lossy(payload);
        let command = command.trim_end_matches(['\0', '\n', '\r']);

        if command == CMD_LIST {
            let xml = broker.registry().describe_xml();
            match Buffer::from_slice(xml.as_bytes()) {
                Ok(buffer) => {
                    if let Err(e) =
                        broker.publish_to_client(service.id(), client, timestamp_micros(), &buffer)
                    {
                        tracing::debug!(client = %client, error = %e, "Service list not sent");
                    }
                }
                Err(e) => tracing::warn!(client = %client, error = %e, "Service list failed"),
            }
        } else if let Some(target) = command.strip_prefix(CMD_START) {
            if let Err(e) = broker.subscribe(client, target) {
                tracing::debug!(client = %client, service = %target, error = %e, "Start failed");
            }
        } else if let Some(target) = command.strip_prefix(CMD_STOP) {
            let subscribed = broker
                .client(client)
                .and_then(|c| c.service())
                .is_some_and(|s| s.id() == target);
            if subscribed {
                if let Err(e) = broker.unsubscribe(client) {
                    tracing::debug!(client = %client, service = %target, error = %e, "Stop failed");
                }
            }
        } else {
            tracing::debug!(client = %client, command = %command, "Unknown list command");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::broker::Sink;
    use crate::builtin::{register_defaults, ECHO_SERVICE, LIST_SERVICE};
    use crate::registry::ServiceRegistry;

    fn broker() -> StreamBroker {
        let registry = Arc::new(ServiceRegistry::new());
        register_defaults(&registry).unwrap();
        StreamBroker::new(registry)
    }

    #[tokio::test]
    async fn test_list_command() {
        let broker = broker();
        let (tx, mut rx) = mpsc::channel(4);
        let client = broker.attach(Sink::Channel(tx), "c").unwrap();

        broker
            .client_data(client.id(), LIST_SERVICE, 0, b"list\0")
            .unwrap();
        assert_eq!(client.queued(), 1);

        let broker = Arc::new(broker);
        let workers = broker.spawn_senders();
        let packet = rx.recv().await.unwrap();
        let xml = String::from_utf8(packet.buffer.to_vec().unwrap()).unwrap();
        assert!(xml.starts_with("<servicelist>"));
        assert!(xml.contains("id=\"__echo\""));

        for w in workers {
            w.abort();
        }
    }

    #[test]
    fn test_start_and_stop() {
        let broker = broker();
        let (tx, _rx) = mpsc::channel(4);
        let client = broker.attach(Sink::Channel(tx), "c").unwrap();

        broker
            .client_data(client.id(), LIST_SERVICE, 0, b"start=__echo")
            .unwrap();
        assert_eq!(broker.client_count(ECHO_SERVICE), 1);

        // Stopping a different service leaves the subscription alone
        broker
            .client_data(client.id(), LIST_SERVICE, 0, b"stop=__alive")
            .unwrap();
        assert_eq!(broker.client_count(ECHO_SERVICE), 1);

        broker
            .client_data(client.id(), LIST_SERVICE, 0, b"stop=__echo")
            .unwrap();
        assert_eq!(broker.client_count(ECHO_SERVICE), 0);
    }
}
