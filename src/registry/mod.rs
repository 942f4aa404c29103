//! Service registry
//!
//! A service is a named publish endpoint with a payload format tag and an
//! optional set of lifecycle callbacks.
//!
//! ```text
//!                 Arc<ServiceRegistry>
//!            ┌──────────────────────────┐
//!            │ services: HashMap<id,    │
//!            │   Arc<Service {          │
//!            │     name, format,        │
//!            │     handler,             │
//!            │   }>                     │
//!            │ >                        │
//!            └────────────┬─────────────┘
//!                         │ lookup()
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!     [producer]     [broker]     [control plane]
//!     register()     publish()    list / subscribe
//! ```

pub mod error;
pub mod service;
pub mod store;

pub use error::RegistryError;
pub use service::{format, Service, ServiceDescriptor, ServiceHandler};
pub use store::{ServiceRegistry, MAX_SERVICE_ID_LEN};
