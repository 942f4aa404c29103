//! Transport listeners
//!
//! ```text
//!   TCP accept ──┐
//!  Unix accept ──┼──► Connection task ──► ParseState ──► Dispatcher
//!                │      (read side)                       │
//!  UDP recv ─────┴──► per-datagram ParseState ────────────┤
//!                                                         ▼
//!                           control plane / method table / client data
//! ```

pub mod config;
mod connection;
mod datagram;
mod dispatch;
pub mod listener;

pub use config::ServerConfig;
pub use listener::{DataServer, RunningServer};
