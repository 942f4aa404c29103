//! `log` service
//!
//! [`LogLayer`] plugs into a `tracing_subscriber` registry and turns every
//! event into one text line. Lines are kept in a bounded history, replayed
//! to each new subscriber, and published live by a forwarding task.
//!
//! ```text
//! tracing::info!() ──► LogLayer ──► history (VecDeque)
//!                          │
//!                          └── mpsc ──► forwarder ──► broker.publish("log")
//! ```

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::LOG_SERVICE;
use crate::broker::{timestamp_micros, ClientId, StreamBroker};
use crate::buffer::Buffer;
use crate::registry::{Service, ServiceHandler};

/// Default number of lines kept for replay
pub const DEFAULT_HISTORY: usize = 200;

/// Default number of lines waiting for the forwarder
pub const DEFAULT_QUEUE: usize = 1024;

thread_local! {
    // Set while this thread publishes log lines; events raised meanwhile
    // are not captured.
    static FORWARDING: Cell<bool> = const { Cell::new(false) };
}

pub struct LogService {
    history: Mutex<VecDeque<String>>,
    capacity: usize,
    queue: usize,
    live: Mutex<Option<mpsc::Sender<String>>>,
    dropped: AtomicU64,
}

impl LogService {
    pub fn new() -> Arc<Self> {
        Self::with_history(DEFAULT_HISTORY)
    }

    pub fn with_history(capacity: usize) -> Arc<Self> {
        Self::with_limits(capacity, DEFAULT_QUEUE)
    }

    /// `capacity` replayed lines, `queue` lines waiting for the forwarder
    pub fn with_limits(capacity: usize, queue: usize) -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            queue: queue.max(1),
            live: Mutex::new(None),
            dropped: AtomicU64::new(0),
        })
    }

    /// Layer capturing events into this service
    pub fn layer(self: &Arc<Self>) -> LogLayer {
        LogLayer {
            service: Arc::clone(self),
        }
    }

    /// Start publishing captured lines through `broker`
    ///
    /// Replaces any previous forwarder.
    pub fn attach(&self, broker: &Arc<StreamBroker>) -> tokio::task::JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<String>(self.queue);
        *self.live.lock() = Some(tx);

        let broker = Arc::clone(broker);
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                FORWARDING.with(|flag| flag.set(true));
                if let Ok(buffer) = Buffer::from_slice(line.as_bytes()) {
                    broker.publish(LOG_SERVICE, timestamp_micros(), &buffer);
                }
                FORWARDING.with(|flag| flag.set(false));
            }
        })
    }

    /// Captured lines, oldest first
    pub fn history(&self) -> Vec<String> {
        self.history.lock().iter().cloned().collect()
    }

    /// Lines not published live because the forwarder fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record(&self, line: String) {
        {
            let mut history = self.history.lock();
            if self.capacity > 0 {
                if history.len() == self.capacity {
                    history.pop_front();
                }
                history.push_back(line.clone());
            }
        }

        if let Some(tx) = self.live.lock().as_ref() {
            if tx.try_send(line).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl ServiceHandler for LogService {
    fn on_connect(&self, broker: &StreamBroker, service: &Service, client: ClientId) {
        let replay: String = self.history.lock().iter().map(String::as_str).collect();
        if replay.is_empty() {
            return;
        }

        FORWARDING.with(|flag| flag.set(true));
        match Buffer::from_slice(replay.as_bytes()) {
            Ok(buffer) => {
                if let Err(e) =
                    broker.publish_to_client(service.id(), client, timestamp_micros(), &buffer)
                {
                    tracing::debug!(client = %client, error = %e, "Log history not sent");
                }
            }
            Err(e) => tracing::debug!(client = %client, error = %e, "Log history buffer failed"),
        }
        FORWARDING.with(|flag| flag.set(false));
    }
}

/// `tracing_subscriber` layer feeding a [`LogService`]
pub struct LogLayer {
    service: Arc<LogService>,
}

impl<S: Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if FORWARDING.with(Cell::get) {
            return;
        }

        let meta = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let mut line = format!("{:>5} {}: {}", meta.level(), meta.target(), visitor.message);
        line.push_str(&visitor.fields);
        line.push('\n');

        self.service.record(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
