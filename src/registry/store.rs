//! Service registry implementation
//!
//! Maps service ids to their metadata. Producers register services at
//! load time; the broker and the control plane look them up.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::RegistryError;
use super::service::{Service, ServiceDescriptor};

/// Longest accepted service id, in bytes
pub const MAX_SERVICE_ID_LEN: usize = 255;

/// Registry of all services
///
/// One coarse `RwLock` guards the table. Lookups vastly outnumber
/// registrations, and the lock is never held across a callback or an await.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service
    ///
    /// Fails if the id is already registered; unregister it first to
    /// replace it.
    pub fn register(&self, descriptor: ServiceDescriptor) -> Result<Arc<Service>, RegistryError> {
        let id = descriptor.id();
        if id.is_empty() || id.len() > MAX_SERVICE_ID_LEN {
            return Err(RegistryError::InvalidId(id.to_string()));
        }

        let mut services = self.services.write();
        if services.contains_key(id) {
            return Err(RegistryError::DuplicateService(id.to_string()));
        }

        let service = Arc::new(descriptor.into_service());
        services.insert(service.id().to_string(), Arc::clone(&service));

        tracing::info!(
            service = %service.id(),
            name = %service.name(),
            format = %service.format(),
            "Service registered"
        );

        Ok(service)
    }

    /// Look up a service by id
    pub fn lookup(&self, id: &str) -> Option<Arc<Service>> {
        self.services.read().get(id).cloned()
    }

    /// Look up a service, failing if it is not registered
    pub fn get(&self, id: &str) -> Result<Arc<Service>, RegistryError> {
        self.lookup(id)
            .ok_or_else(|| RegistryError::ServiceNotFound(id.to_string()))
    }

    /// Remove a service
    ///
    /// Clients still subscribed keep their handle; use
    /// [`StreamBroker::unregister_service`](crate::StreamBroker::unregister_service)
    /// to also drop their subscriptions.
    pub fn unregister(&self, id: &str) -> Result<Arc<Service>, RegistryError> {
        let removed = self
            .services
            .write()
            .remove(id)
            .ok_or_else(|| RegistryError::ServiceNotFound(id.to_string()))?;

        tracing::info!(service = %id, "Service unregistered");
        Ok(removed)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// All services, ordered by id
    pub fn list(&self) -> Vec<Arc<Service>> {
        let mut services: Vec<_> = self.services.read().values().cloned().collect();
        services.sort_by(|a, b| a.id().cmp(b.id()));
        services
    }

    /// `<servicelist>` document describing every service
    pub fn describe_xml(&self) -> String {
        let mut xml = String::from("<servicelist>");

        for service in self.list() {
            let _ = write!(
                xml,
                "<service id=\"{}\" name=\"{}\" format=\"{}\">",
                escape(service.id()),
                escape(service.name()),
                escape(service.format())
            );
            if let Some(desc) = service.description() {
                let _ = write!(xml, "<description>{}</description>", escape(desc));
            }
            if let Some(params) = service.params() {
                let _ = write!(xml, "<params>{}</params>", escape(params));
            }
            xml.push_str("</service>");
        }

        xml.push_str("</servicelist>");
        xml
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
