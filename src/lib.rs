//! svcstream: the data plane of a control kernel
//!
//! Blocks inside the kernel produce data and publish it to named services.
//! External observers (consoles, loggers, UIs) connect over TCP, UDP or a
//! local Unix socket, subscribe to a service and receive every packet that
//! is published to it.
//!
//! ```text
//!  producer ──► Buffer ──► StreamBroker::publish
//!                               │  one duplicate per client
//!               ┌───────────────┼───────────────┐
//!               ▼               ▼               ▼
//!          [queue c1]      [queue c2]      [queue c3]     bounded, drop-oldest
//!               │               │               │
//!               └──── sender worker pool ───────┘
//!                               │  'D' prefix + sendfile(buffer)
//!                               ▼
//!                        TCP / Unix / UDP
//! ```
//!
//! # Example
//!
//! ```no_run
//! use svcstream::{Buffer, DataServer, ServerConfig, ServiceDescriptor};
//!
//! # async fn run() -> svcstream::Result<()> {
//! let server = DataServer::new(ServerConfig::default());
//! server
//!     .registry()
//!     .register(ServiceDescriptor::new("imu", "IMU samples", "CSV"))?;
//!
//! let running = server.start().await?;
//!
//! let mut buffer = Buffer::new()?;
//! buffer.write(b"0.1,0.2,9.81\n");
//! server.broker().publish("imu", svcstream::timestamp_micros(), &buffer);
//!
//! running.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod buffer;
pub mod builtin;
pub mod client;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod stats;
pub mod wire;

pub use broker::{timestamp_micros, BrokerConfig, ClientId, OverflowPolicy, Packet, StreamBroker};
pub use buffer::{BackingStore, Buffer};
pub use client::{DataEvent, ServiceClient};
pub use error::{BrokerError, BufferError, Error, ProtocolError, Result};
pub use registry::{Service, ServiceDescriptor, ServiceHandler, ServiceRegistry};
pub use rpc::MethodTable;
pub use server::{DataServer, RunningServer, ServerConfig};
pub use wire::{Message, MessageBuilder, MessageKind, ParseState, Value};
