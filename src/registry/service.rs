//! Service metadata and callbacks

use std::fmt;
use std::sync::Arc;

use crate::broker::{ClientId, StreamBroker};

/// Common payload format tags
pub mod format {
    pub const TXT: &str = "TXT";
    pub const XML: &str = "XML";
    pub const CSV: &str = "CSV";
    pub const JPEG: &str = "JPEG";
    pub const RAW: &str = "RAW";
}

/// Lifecycle callbacks a service may expose
///
/// Callbacks run on the thread that triggered them (a connection task or
/// the sweeper) with no broker locks held, so they may publish.
pub trait ServiceHandler: Send + Sync + 'static {
    /// A client subscribed to the service
    fn on_connect(&self, _broker: &StreamBroker, _service: &Service, _client: ClientId) {}

    /// A subscribed client unsubscribed, disconnected or timed out
    fn on_disconnect(&self, _broker: &StreamBroker, _service: &Service, _client: ClientId) {}

    /// A client sent data addressed to the service
    fn on_client_data(
        &self,
        _broker: &StreamBroker,
        _service: &Service,
        _client: ClientId,
        _timestamp_us: u64,
        _payload: &[u8],
    ) {
    }
}

/// A registered publish endpoint
///
/// Immutable once registered.
pub struct Service {
    id: String,
    name: String,
    format: String,
    params: Option<String>,
    description: Option<String>,
    handler: Option<Arc<dyn ServiceHandler>>,
}

impl Service {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn params(&self) -> Option<&str> {
        self.params.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn handler(&self) -> Option<&Arc<dyn ServiceHandler>> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("format", &self.format)
            .field("params", &self.params)
            .field("description", &self.description)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Registration request for a service
pub struct ServiceDescriptor {
    id: String,
    name: String,
    format: String,
    params: Option<String>,
    description: Option<String>,
    handler: Option<Arc<dyn ServiceHandler>>,
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            format: format.into(),
            params: None,
            description: None,
            handler: None,
        }
    }

    /// Free-form parameter string describing the payload
    pub fn params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ServiceHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn into_service(self) -> Service {
        Service {
            id: self.id,
            name: self.name,
            format: self.format,
            params: self.params,
            description: self.description,
            handler: self.handler,
        }
    }
}
