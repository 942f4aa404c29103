//! Stream connection handling
//!
//! One task per accepted TCP or Unix connection. The task owns the read
//! side: readiness-driven reads feed a [`ParseState`], completed messages
//! go through the [`Dispatcher`]. Data packets are written by the broker's
//! sender pool through the shared socket.

use std::io;
use std::sync::Arc;

use crate::broker::{ClientStream, DetachReason};
use crate::buffer::StreamSocket;
use crate::server::dispatch::Dispatcher;
use crate::wire::{ParseState, State};

pub(crate) struct Connection<S: StreamSocket> {
    socket: Arc<S>,
    client: Arc<ClientStream>,
    dispatcher: Arc<Dispatcher>,
    parser: ParseState,
    read_buf: Vec<u8>,
}

impl<S: StreamSocket> Connection<S> {
    pub fn new(
        socket: Arc<S>,
        client: Arc<ClientStream>,
        dispatcher: Arc<Dispatcher>,
        read_buffer_size: usize,
        max_message_size: usize,
    ) -> Self {
        Self {
            socket,
            client,
            dispatcher,
            parser: ParseState::with_max_message_size(max_message_size),
            read_buf: vec![0u8; read_buffer_size],
        }
    }

    /// Serve the connection until it closes, then detach the client
    pub async fn run(mut self) {
        let id = self.client.id();
        let reason = self.serve().await;

        if let Some(reason) = reason {
            self.dispatcher.broker().detach(id, reason);
        }
        tracing::debug!(client = %id, "Connection closed");
    }

    /// `None` once the broker has already detached the client
    async fn serve(&mut self) -> Option<DetachReason> {
        loop {
            tokio::select! {
                _ = self.client.closed() => return None,
                ready = self.socket.readable() => {
                    if let Err(e) = ready {
                        tracing::debug!(client = %self.client.id(), error = %e, "Socket error");
                        return Some(DetachReason::Closed);
                    }
                }
            }

            match self.socket.try_read(&mut self.read_buf) {
                Ok(0) => self.parser.mark_eof(),
                Ok(n) => {
                    self.parser.feed(&self.read_buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    tracing::debug!(client = %self.client.id(), error = %e, "Read failed");
                    return Some(DetachReason::Closed);
                }
            }

            if let Some(reason) = self.drain().await {
                return Some(reason);
            }
        }
    }

    /// Dispatch every completed message
    async fn drain(&mut self) -> Option<DetachReason> {
        loop {
            match self.parser.next_message() {
                Ok(Some(message)) => {
                    let outcome = self.dispatcher.handle(&self.client, message);
                    if let Some(reply) = outcome.reply {
                        if let Err(e) = self.client.send_message(&reply).await {
                            tracing::debug!(client = %self.client.id(), error = %e, "Reply failed");
                            return Some(DetachReason::SendFailed);
                        }
                    }
                    if outcome.close {
                        return Some(DetachReason::Goodbye);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        client = %self.client.id(),
                        peer = %self.client.peer(),
                        error = %e,
                        "Protocol error"
                    );
                    return Some(DetachReason::ProtocolError);
                }
            }
        }

        if self.parser.state() == State::Eof {
            return Some(DetachReason::Closed);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    use super::*;
    use crate::broker::{Sink, StreamBroker};
    use crate::registry::ServiceRegistry;
    use crate::rpc::MethodTable;
    use crate::wire::constants::{CMD_GOODBYE, CMD_HEARTBEAT};
    use crate::wire::{Message, MessageKind, Value};

    fn spawn_connection() -> (UnixStream, Arc<StreamBroker>, tokio::task::JoinHandle<()>) {
        let (server, peer) = UnixStream::pair().unwrap();
        let server = Arc::new(server);
        let broker = Arc::new(StreamBroker::new(Arc::new(ServiceRegistry::new())));
        let methods = Arc::new(MethodTable::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&broker), methods));
        let client = broker.attach(Sink::Unix(Arc::clone(&server)), "pair").unwrap();

        let conn = Connection::new(server, client, dispatcher, 7, 1024);
        (peer, broker, tokio::spawn(conn.run()))
    }

    async fn read_reply(peer: &mut UnixStream) -> Message {
        let mut parser = ParseState::new();
        let mut buf = [0u8; 256];
        loop {
            if let Some(message) = parser.next_message().unwrap() {
                return message;
            }
            let n = peer.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed before reply");
            parser.feed(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_heartbeat_reply_with_small_reads() {
        let (mut peer, broker, task) = spawn_connection();

        let call = Message::call(CMD_HEARTBEAT, vec![]).encode().unwrap();
        peer.write_all(&call).await.unwrap();

        let reply = read_reply(&mut peer).await;
        assert_eq!(reply.kind, MessageKind::Return);
        assert_eq!(reply.value(), Some(&Value::Boolean(true)));
        assert_eq!(broker.total_clients(), 1);

        drop(peer);
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(broker.total_clients(), 0);
    }

    #[tokio::test]
    async fn test_goodbye_detaches() {
        let (mut peer, broker, task) = spawn_connection();

        let bye = Message::call(CMD_GOODBYE, vec![]).encode().unwrap();
        peer.write_all(&bye).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(broker.total_clients(), 0);
        assert_eq!(broker.stats().snapshot().clients_connected, 0);
    }

    #[tokio::test]
    async fn test_protocol_error_detaches() {
        let (mut peer, broker, task) = spawn_connection();

        // Marker, then a header length below the minimum
        peer.write_all(&[0xA5, 0xA5, 0xA5, 0xA5, 0x00, 0x01, 0x00]).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(broker.total_clients(), 0);
    }

    #[tokio::test]
    async fn test_broker_detach_stops_task() {
        let (_peer, broker, task) = spawn_connection();

        broker.detach_all(DetachReason::Shutdown);
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
