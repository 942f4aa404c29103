//! Stream broker
//!
//! Fans published buffers out to every client subscribed to a service.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<StreamBroker>
//!              ┌─────────────────────────────────────┐
//!              │ tables (one RwLock):                │
//!              │   clients:     id ─► ClientStream   │
//!              │   subscribers: service ─► [id]      │
//!              │ ready: mpsc<ClientId>               │
//!              └──────┬──────────────────┬───────────┘
//!                     │ publish()        │ sweep()
//!                     ▼                  ▼
//!        ClientStream { queue, sink }   detach idle clients
//!                     │
//!                     ▼ sender workers
//!               TCP / Unix / UDP / channel
//! ```
//!
//! # Backpressure
//!
//! Each client queue holds at most `queue_depth` packets. When a publish
//! would exceed it, the [`OverflowPolicy`] decides: evict the oldest
//! packet (default), discard the new one, or disconnect the client. The
//! publisher is never blocked.

pub mod client;
pub mod config;
pub mod packet;
pub mod sender;
pub mod store;

pub use client::{ClientId, ClientStream, DetachReason, Sink, Transport, MAX_DATAGRAM_SIZE};
pub use config::{BrokerConfig, OverflowPolicy};
pub use packet::{timestamp_micros, Packet};
pub use store::StreamBroker;
