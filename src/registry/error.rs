//! Registry error types

/// Error type for service registry operations
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A service with this id is already registered
    DuplicateService(String),
    /// No service with this id
    ServiceNotFound(String),
    /// Service id is empty or too long
    InvalidId(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateService(id) => write!(f, "Service already registered: {}", id),
            RegistryError::ServiceNotFound(id) => write!(f, "Service not found: {}", id),
            RegistryError::InvalidId(id) => write!(f, "Invalid service id: {:?}", id),
        }
    }
}

impl std::error::Error for RegistryError {}
