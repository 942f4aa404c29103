//! Observer client
//!
//! Client side of the data plane, used by tools and tests to subscribe to
//! services and call methods over a stream transport.

pub mod observer;

pub use observer::{DataEvent, ServiceClient, DEFAULT_KEEPALIVE};
