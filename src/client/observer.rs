//! Stream observer client

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs, UnixStream};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::wire::constants::{
    CMD_GOODBYE, CMD_HEARTBEAT, CMD_LIST, CMD_SUBSCRIBE, CMD_UNSUBSCRIBE, DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::wire::{Message, MessageKind, ParseState, State, Value};

/// Default idle time before a waiting client sends a heartbeat
///
/// Shorter than the broker's default client timeout.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(1);

/// One packet received from a subscribed or answering service
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub service: String,
    pub timestamp_us: u64,
    pub payload: Bytes,
}

/// Client for one data-plane connection
///
/// Data events that arrive while a call waits for its reply are queued and
/// returned by later [`next_event`](Self::next_event) calls. While waiting
/// for events the client sends a `heartbeat` whenever it has been silent for
/// the keepalive interval, so a receive-only subscriber is not swept.
///
/// # Example
/// ```no_run
/// use svcstream::ServiceClient;
///
/// # async fn example() -> svcstream::Result<()> {
/// let mut client = ServiceClient::connect_tcp("127.0.0.1:10001").await?;
/// client.subscribe("log").await?;
///
/// // Heartbeats go out while waiting here
/// loop {
///     let event = client.next_event().await?;
///     print!("{}", String::from_utf8_lossy(&event.payload));
/// }
/// # }
/// ```
pub struct ServiceClient<S> {
    io: S,
    parser: ParseState,
    read_buf: Vec<u8>,
    events: VecDeque<DataEvent>,
    keepalive: Option<Duration>,
    last_sent: Instant,
}

impl ServiceClient<TcpStream> {
    pub async fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl ServiceClient<UnixStream> {
    pub async fn connect_unix(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ServiceClient<S> {
    /// Wrap an already connected stream
    pub fn new(io: S) -> Self {
        Self::with_max_message_size(io, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Wrap a stream, accepting events of up to `max` encoded bytes
    pub fn with_max_message_size(io: S, max: usize) -> Self {
        Self {
            io,
            parser: ParseState::with_max_message_size(max),
            read_buf: vec![0u8; 8192],
            events: VecDeque::new(),
            keepalive: Some(DEFAULT_KEEPALIVE),
            last_sent: Instant::now(),
        }
    }

    /// Heartbeat interval while waiting for events, `None` to never send one
    pub fn keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive = interval;
        self
    }

    /// Follow `service`, leaving any previous subscription
    pub async fn subscribe(&mut self, service: &str) -> Result<()> {
        self.call(CMD_SUBSCRIBE, vec![service.into()]).await?;
        Ok(())
    }

    pub async fn unsubscribe(&mut self) -> Result<()> {
        self.call(CMD_UNSUBSCRIBE, vec![]).await?;
        Ok(())
    }

    pub async fn heartbeat(&mut self) -> Result<()> {
        self.call(CMD_HEARTBEAT, vec![]).await?;
        Ok(())
    }

    /// `<servicelist>` document
    pub async fn list(&mut self) -> Result<String> {
        match self.call(CMD_LIST, vec![]).await? {
            Value::String(xml) => Ok(xml),
            other => Err(Error::Remote(format!(
                "list returned '{}' instead of a string",
                other.type_code().as_char()
            ))),
        }
    }

    /// Call a method and wait for its return value
    pub async fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.send(&Message::call(name, args)).await?;

        loop {
            let message = self.read_message().await?;
            match message.kind {
                MessageKind::Event => self.queue_event(message),
                MessageKind::Return if message.name == name => {
                    return message
                        .body
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::Remote(format!("{} returned nothing", name)));
                }
                MessageKind::Return if message.name == CMD_HEARTBEAT => {}
                MessageKind::Error if message.name == name => {
                    let reason = message
                        .value()
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    return Err(Error::Remote(reason));
                }
                _ => {
                    tracing::debug!(
                        kind = %message.kind,
                        name = %message.name,
                        expected = %name,
                        "Ignoring unexpected reply"
                    );
                }
            }
        }
    }

    /// Send client data to `service`
    pub async fn send_client_data(
        &mut self,
        service: &str,
        timestamp_us: u64,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.send(&Message::event(service, timestamp_us, payload.into()))
            .await
    }

    /// Next data event
    pub async fn next_event(&mut self) -> Result<DataEvent> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }

        loop {
            let message = self.read_message_with_keepalive().await?;
            match message.kind {
                MessageKind::Event => {
                    if let Some(event) = to_event(message) {
                        return Ok(event);
                    }
                }
                MessageKind::Return if message.name == CMD_HEARTBEAT => {}
                _ => {
                    tracing::debug!(kind = %message.kind, name = %message.name, "Ignoring unexpected reply");
                }
            }
        }
    }

    /// Next data event, failing with [`Error::Timeout`] after `limit`
    pub async fn next_event_timeout(&mut self, limit: Duration) -> Result<DataEvent> {
        tokio::time::timeout(limit, self.next_event()).await?
    }

    /// Events received and not yet returned
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Say goodbye and close the connection
    pub async fn goodbye(mut self) -> Result<()> {
        self.send(&Message::call(CMD_GOODBYE, vec![])).await?;
        self.io.shutdown().await?;
        Ok(())
    }

    /// Consume the client, returning the underlying stream
    pub fn into_inner(self) -> S {
        self.io
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        self.io.write_all(&bytes).await?;
        self.io.flush().await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.parser.next_message()? {
                return Ok(message);
            }
            if self.parser.state() == State::Eof {
                return Err(Error::ConnectionClosed);
            }

            let n = self.io.read(&mut self.read_buf).await?;
            self.consume(n);
        }
    }

    /// Like `read_message`, sending a heartbeat without awaiting its reply
    /// each time the keepalive interval passes in silence
    async fn read_message_with_keepalive(&mut self) -> Result<Message> {
        let Some(interval) = self.keepalive else {
            return self.read_message().await;
        };

        loop {
            if let Some(message) = self.parser.next_message()? {
                return Ok(message);
            }
            if self.parser.state() == State::Eof {
                return Err(Error::ConnectionClosed);
            }

            let deadline = self.last_sent + interval;
            let read = tokio::select! {
                n = self.io.read(&mut self.read_buf) => Some(n?),
                _ = tokio::time::sleep_until(deadline) => None,
            };

            match read {
                Some(n) => self.consume(n),
                None => {
                    tracing::trace!("Sending keepalive heartbeat");
                    self.send(&Message::call(CMD_HEARTBEAT, vec![])).await?;
                }
            }
        }
    }

    fn consume(&mut self, n: usize) {
        if n == 0 {
            self.parser.mark_eof();
        } else {
            self.parser.feed(&self.read_buf[..n]);
        }
    }

    fn queue_event(&mut self, message: Message) {
        if let Some(event) = to_event(message) {
            self.events.push_back(event);
        }
    }
}

fn to_event(message: Message) -> Option<DataEvent> {
    let Some((timestamp_us, payload)) = message.as_event().map(|(ts, p)| (ts, p.clone())) else {
        tracing::debug!(service = %message.name, signature = %message.signature, "Malformed data event");
        return None;
    };

    Some(DataEvent {
        service: message.name,
        timestamp_us,
        payload,
    })
}
