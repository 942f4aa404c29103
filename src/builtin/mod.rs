//! Built-in services
//!
//! | id        | format | behaviour                                        |
//! |-----------|--------|--------------------------------------------------|
//! | `__list`  | XML    | `list`, `start=<id>`, `stop=<id>` text commands  |
//! | `__alive` | RAW    | keep-alive sink, never answers                   |
//! | `__echo`  | RAW    | sends client data straight back to the sender    |
//! | `log`     | TXT    | process log lines, history replayed on subscribe |

pub mod echo;
pub mod list;
pub mod log;

pub use echo::{AliveService, EchoService};
pub use list::ListService;
pub use log::{LogLayer, LogService};

use std::sync::Arc;

use crate::registry::{format, RegistryError, ServiceDescriptor, ServiceRegistry};

pub const LIST_SERVICE: &str = "__list";
pub const ALIVE_SERVICE: &str = "__alive";
pub const ECHO_SERVICE: &str = "__echo";
pub const LOG_SERVICE: &str = "log";

/// Register `__list`, `__alive` and `__echo`
pub fn register_defaults(registry: &ServiceRegistry) -> Result<(), RegistryError> {
    registry.register(
        ServiceDescriptor::new(LIST_SERVICE, "Service list", format::XML)
            .description("Lists services and starts or stops streams")
            .handler(Arc::new(ListService)),
    )?;
    registry.register(
        ServiceDescriptor::new(ALIVE_SERVICE, "Keep alive", format::RAW)
            .description("Accepts client data and never answers")
            .handler(Arc::new(AliveService)),
    )?;
    registry.register(
        ServiceDescriptor::new(ECHO_SERVICE, "Echo", format::RAW)
            .description("Echoes client data back to the sender")
            .handler(Arc::new(EchoService)),
    )?;
    Ok(())
}

/// Register the `log` service backed by `log`
pub fn register_log(
    registry: &ServiceRegistry,
    log: &Arc<LogService>,
) -> Result<(), RegistryError> {
    registry.register(
        ServiceDescriptor::new(LOG_SERVICE, "Log", format::TXT)
            .description("Process log output")
            .handler(Arc::clone(log) as Arc<dyn crate::registry::ServiceHandler>),
    )?;
    Ok(())
}
