//! Datagram transport
//!
//! Every datagram is parsed on its own; a message split across datagrams is
//! never reassembled. The sender is attributed to a transient client keyed
//! by its address, so services can answer through `publish_to_client`.

use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::broker::{DetachReason, MAX_DATAGRAM_SIZE};
use crate::server::dispatch::Dispatcher;
use crate::wire::ParseState;

pub(crate) async fn serve_datagrams(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
    max_message_size: usize,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(error = %e, "Datagram receive failed");
                continue;
            }
        };

        let client = match dispatcher.broker().attach_datagram(&socket, peer) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Datagram client rejected");
                continue;
            }
        };

        let mut parser = ParseState::with_max_message_size(max_message_size);
        parser.feed(&buf[..n]);

        loop {
            match parser.next_message() {
                Ok(Some(message)) => {
                    let outcome = dispatcher.handle(&client, message);
                    if let Some(reply) = outcome.reply {
                        if let Err(e) = client.send_message(&reply).await {
                            tracing::debug!(peer = %peer, error = %e, "Datagram reply failed");
                        }
                    }
                    if outcome.close {
                        dispatcher.broker().detach(client.id(), DetachReason::Goodbye);
                        break;
                    }
                }
                Ok(None) => {
                    if parser.staged_len() > 0 {
                        tracing::debug!(
                            peer = %peer,
                            bytes = parser.staged_len(),
                            "Incomplete message in datagram"
                        );
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, bytes = n, error = %e, "Protocol error in datagram");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::StreamBroker;
    use crate::registry::ServiceRegistry;
    use crate::rpc::MethodTable;
    use crate::wire::constants::{CMD_GOODBYE, CMD_HEARTBEAT, CMD_SUBSCRIBE};
    use crate::wire::{Message, MessageKind, Value};

    async fn setup() -> (UdpSocket, Arc<StreamBroker>, tokio::task::JoinHandle<()>) {
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.connect(server.local_addr().unwrap()).await.unwrap();

        let broker = Arc::new(StreamBroker::new(Arc::new(ServiceRegistry::new())));
        let methods = Arc::new(MethodTable::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&broker), methods));
        let task = tokio::spawn(serve_datagrams(server, dispatcher, 4096));
        (peer, broker, task)
    }

    async fn recv(peer: &UdpSocket) -> Message {
        let mut buf = [0u8; 1024];
        let n = tokio::time::timeout(Duration::from_secs(1), peer.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let mut parser = ParseState::new();
        parser.feed(&buf[..n]);
        parser.next_message().unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_two_calls_in_one_datagram() {
        let (peer, broker, task) = setup().await;

        let mut datagram = Message::call(CMD_HEARTBEAT, vec![]).encode().unwrap().to_vec();
        datagram.extend_from_slice(&Message::call(CMD_HEARTBEAT, vec![]).encode().unwrap());
        peer.send(&datagram).await.unwrap();

        for _ in 0..2 {
            let reply = recv(&peer).await;
            assert_eq!(reply.kind, MessageKind::Return);
            assert_eq!(reply.value(), Some(&Value::Boolean(true)));
        }
        assert_eq!(broker.total_clients(), 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_subscribe_refused() {
        let (peer, _broker, task) = setup().await;

        let call = Message::call(CMD_SUBSCRIBE, vec!["log".into()]).encode().unwrap();
        peer.send(&call).await.unwrap();

        let reply = recv(&peer).await;
        assert_eq!(reply.kind, MessageKind::Error);
        task.abort();
    }

    #[tokio::test]
    async fn test_goodbye_detaches_transient_client() {
        let (peer, broker, task) = setup().await;

        peer.send(&Message::call(CMD_HEARTBEAT, vec![]).encode().unwrap())
            .await
            .unwrap();
        recv(&peer).await;
        assert_eq!(broker.total_clients(), 1);

        peer.send(&Message::call(CMD_GOODBYE, vec![]).encode().unwrap())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.total_clients() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        task.abort();
    }
}
