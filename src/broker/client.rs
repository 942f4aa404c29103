//! Client streams

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::net::{TcpStream, UdpSocket, UnixStream};
use tokio::sync::{mpsc, Notify};

use super::config::OverflowPolicy;
use super::packet::Packet;
use crate::buffer::{write_all, StreamSocket};
use crate::error::{Error, ProtocolError, Result};
use crate::registry::Service;
use crate::wire::{encode_data_prefix, Message};

/// Largest UDP payload that fits one IPv4 datagram
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Broker-generated client identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport a client arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Unix,
    Datagram,
    /// In-process consumer
    Channel,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Unix => write!(f, "unix"),
            Transport::Datagram => write!(f, "udp"),
            Transport::Channel => write!(f, "channel"),
        }
    }
}

/// Where a client's packets go
pub enum Sink {
    Tcp(Arc<TcpStream>),
    Unix(Arc<UnixStream>),
    Datagram {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
    /// Packets are handed over as-is to an in-process receiver
    Channel(mpsc::Sender<Packet>),
}

impl Sink {
    pub fn transport(&self) -> Transport {
        match self {
            Sink::Tcp(_) => Transport::Tcp,
            Sink::Unix(_) => Transport::Unix,
            Sink::Datagram { .. } => Transport::Datagram,
            Sink::Channel(_) => Transport::Channel,
        }
    }
}

/// Why a client was detached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The client said goodbye
    Goodbye,
    /// The peer closed the connection
    Closed,
    /// The client sent malformed input
    ProtocolError,
    /// No activity within the client timeout
    Timeout,
    /// A packet could not be transmitted
    SendFailed,
    /// Queue overflow under the disconnect policy
    Overflow,
    /// The server is shutting down
    Shutdown,
}

impl fmt::Display for DetachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetachReason::Goodbye => "goodbye",
            DetachReason::Closed => "closed",
            DetachReason::ProtocolError => "protocol error",
            DetachReason::Timeout => "timeout",
            DetachReason::SendFailed => "send failed",
            DetachReason::Overflow => "queue overflow",
            DetachReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Result of offering a packet to a client queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    Queued,
    /// Queued after evicting the oldest packet
    EvictedOldest,
    /// The new packet was discarded
    DroppedNewest,
    /// The queue is full and the policy is to disconnect
    Overflow,
    Closed,
}

/// A live client attached to the broker
pub struct ClientStream {
    id: ClientId,
    peer: String,
    sink: Sink,
    connected_at: Instant,
    service: Mutex<Option<Arc<Service>>>,
    queue: Mutex<VecDeque<Packet>>,
    last_activity: Mutex<Instant>,
    scheduled: AtomicBool,
    closed: AtomicBool,
    close_notify: Notify,
    /// Serializes whole messages on stream sockets
    write_lock: tokio::sync::Mutex<()>,
}

impl ClientStream {
    pub(crate) fn new(id: ClientId, peer: String, sink: Sink) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            sink,
            connected_at: now,
            service: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            last_activity: Mutex::new(now),
            scheduled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn transport(&self) -> Transport {
        self.sink.transport()
    }

    pub(crate) fn datagram_peer(&self) -> Option<SocketAddr> {
        match &self.sink {
            Sink::Datagram { peer, .. } => Some(*peer),
            _ => None,
        }
    }

    /// Time since the client attached
    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Service the client is subscribed to
    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.lock().clone()
    }

    pub(crate) fn replace_service(&self, service: Option<Arc<Service>>) -> Option<Arc<Service>> {
        std::mem::replace(&mut *self.service.lock(), service)
    }

    /// Packets waiting to be sent
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the broker has detached this client
    pub async fn closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Mark closed and release queued packets, returning how many
    pub(crate) fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let released = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        self.close_notify.notify_waiters();
        released
    }

    pub(crate) fn enqueue(&self, packet: Packet, depth: usize, policy: OverflowPolicy) -> Enqueued {
        if self.is_closed() {
            return Enqueued::Closed;
        }

        let mut queue = self.queue.lock();
        if queue.len() < depth {
            queue.push_back(packet);
            return Enqueued::Queued;
        }

        match policy {
            OverflowPolicy::DropOldest => {
                queue.pop_front();
                queue.push_back(packet);
                Enqueued::EvictedOldest
            }
            OverflowPolicy::DropNewest => Enqueued::DroppedNewest,
            OverflowPolicy::Disconnect => Enqueued::Overflow,
        }
    }

    pub(crate) fn pop(&self) -> Option<Packet> {
        self.queue.lock().pop_front()
    }

    /// Claim the right to drain this client; `false` if already claimed
    pub(crate) fn try_schedule(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn unschedule(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: Instant) {
        *self.last_activity.lock() = at;
    }

    #[cfg(test)]
    pub(crate) fn queued_timestamps(&self) -> Vec<u64> {
        self.queue.lock().iter().map(|p| p.timestamp_us).collect()
    }

    /// Send a control-plane message (a reply or an error)
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        let bytes = message.encode()?;

        match &self.sink {
            Sink::Tcp(socket) => self.write_stream(&**socket, &bytes).await,
            Sink::Unix(socket) => self.write_stream(&**socket, &bytes).await,
            Sink::Datagram { socket, peer } => {
                socket.send_to(&bytes, peer).await?;
                Ok(())
            }
            Sink::Channel(_) => {
                tracing::debug!(
                    client = %self.id,
                    kind = %message.kind,
                    name = %message.name,
                    "Control message not deliverable to in-process client"
                );
                Ok(())
            }
        }
    }

    /// Transmit one packet as a data event
    pub(crate) async fn deliver(&self, packet: Packet) -> Result<()> {
        match &self.sink {
            Sink::Tcp(socket) => self.deliver_stream(&**socket, &packet).await,
            Sink::Unix(socket) => self.deliver_stream(&**socket, &packet).await,
            Sink::Datagram { socket, peer } => {
                let prefix = encode_data_prefix(
                    &packet.service,
                    packet.timestamp_us,
                    packet.buffer.size() as usize,
                )?;
                let size = prefix.len() + packet.buffer.size() as usize;
                if size > MAX_DATAGRAM_SIZE {
                    return Err(ProtocolError::MessageTooLarge {
                        size,
                        max: MAX_DATAGRAM_SIZE,
                    }
                    .into());
                }

                let mut datagram = BytesMut::with_capacity(size);
                datagram.extend_from_slice(&prefix);
                datagram.extend_from_slice(&packet.buffer.to_vec()?);
                socket.send_to(&datagram, peer).await?;
                Ok(())
            }
            Sink::Channel(tx) => tx.send(packet).await.map_err(|_| Error::ConnectionClosed),
        }
    }

    async fn deliver_stream<S: StreamSocket>(&self, socket: &S, packet: &Packet) -> Result<()> {
        let prefix = encode_data_prefix(
            &packet.service,
            packet.timestamp_us,
            packet.buffer.size() as usize,
        )?;

        let _guard = self.write_lock.lock().await;
        write_all(socket, &prefix).await?;
        packet.buffer.transmit_async(socket).await?;
        Ok(())
    }

    async fn write_stream<S: StreamSocket>(&self, socket: &S, bytes: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_all(socket, bytes).await?;
        Ok(())
    }
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStream")
            .field("id", &self.id)
            .field("transport", &self.transport())
            .field("peer", &self.peer)
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;

    fn packet(ts: u64) -> Packet {
        Packet::new(Arc::from("svc"), ts, Buffer::from_slice(b"p").unwrap())
    }

    fn channel_client() -> (ClientStream, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(8);
        (
            ClientStream::new(ClientId(1), "test".into(), Sink::Channel(tx)),
            rx,
        )
    }

    #[test]
    fn test_enqueue_drop_oldest() {
        let (client, _rx) = channel_client();
        for ts in 0..3 {
            assert_eq!(client.enqueue(packet(ts), 3, OverflowPolicy::DropOldest), Enqueued::Queued);
        }
        assert_eq!(
            client.enqueue(packet(3), 3, OverflowPolicy::DropOldest),
            Enqueued::EvictedOldest
        );
        assert_eq!(client.queued_timestamps(), vec![1, 2, 3]);
    }

    #[test]
    fn test_enqueue_drop_newest() {
        let (client, _rx) = channel_client();
        client.enqueue(packet(0), 1, OverflowPolicy::DropNewest);
        assert_eq!(
            client.enqueue(packet(1), 1, OverflowPolicy::DropNewest),
            Enqueued::DroppedNewest
        );
        assert_eq!(client.queued_timestamps(), vec![0]);
    }

    #[test]
    fn test_enqueue_overflow_disconnect() {
        let (client, _rx) = channel_client();
        client.enqueue(packet(0), 1, OverflowPolicy::Disconnect);
        assert_eq!(
            client.enqueue(packet(1), 1, OverflowPolicy::Disconnect),
            Enqueued::Overflow
        );
    }

    #[test]
    fn test_close_releases_queue() {
        let (client, _rx) = channel_client();
        let payload = Buffer::from_slice(b"shared").unwrap();
        client.enqueue(
            Packet::new(Arc::from("svc"), 0, payload.duplicate()),
            4,
            OverflowPolicy::DropOldest,
        );
        assert_eq!(payload.handle_count(), 2);

        assert_eq!(client.close(), 1);
        assert_eq!(payload.handle_count(), 1);
        assert!(client.is_closed());
        assert_eq!(
            client.enqueue(packet(1), 4, OverflowPolicy::DropOldest),
            Enqueued::Closed
        );
    }

    #[test]
    fn test_schedule_claim() {
        let (client, _rx) = channel_client();
        assert!(client.try_schedule());
        assert!(!client.try_schedule());
        client.unschedule();
        assert!(client.try_schedule());
    }

    #[tokio::test]
    async fn test_closed_future_resolves() {
        let (client, _rx) = channel_client();
        let client = Arc::new(client);

        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.closed().await })
        };
        tokio::task::yield_now().await;

        client.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_deliver_to_channel() {
        let (client, mut rx) = channel_client();
        client.deliver(packet(42)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.timestamp_us, 42);
        assert_eq!(received.service(), "svc");
    }

    #[tokio::test]
    async fn test_deliver_over_unix_stream() {
        use tokio::io::AsyncReadExt;

        use crate::wire::{Message, ParseState, State};

        let (local, mut remote) = UnixStream::pair().unwrap();
        let client = ClientStream::new(ClientId(7), "pair".into(), Sink::Unix(Arc::new(local)));

        let payload = Buffer::from_slice(b"camera frame").unwrap();
        client
            .deliver(Packet::new(Arc::from("cam"), 99, payload.duplicate()))
            .await
            .unwrap();
        drop(client);

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();

        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&received), State::Done);
        assert_eq!(
            parser.take_message().unwrap(),
            Message::event("cam", 99, bytes::Bytes::from_static(b"camera frame"))
        );
    }
}
