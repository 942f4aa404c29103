//! Named RPC methods
//!
//! Method calls that are not control-plane commands are resolved against a
//! [`MethodTable`] and answered with a return-value or error message.

pub mod table;

pub use table::{Method, MethodHandler, MethodTable};

use std::fmt;

use crate::error::ProtocolError;

/// Method table errors
#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    /// A method with this name is already registered
    DuplicateMethod(String),
    /// The name is a control-plane command
    ReservedName(String),
    /// The method signature does not parse
    InvalidSignature(ProtocolError),
    /// No method with this name
    UnknownMethod(String),
    /// Arguments do not match the method's parameters
    Arguments(ProtocolError),
    /// The handler returned the wrong type
    ReturnType { expected: char, found: char },
    /// The handler reported a failure
    Failed(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::DuplicateMethod(name) => write!(f, "Method already registered: {}", name),
            RpcError::ReservedName(name) => write!(f, "Method name is reserved: {}", name),
            RpcError::InvalidSignature(e) => write!(f, "Invalid method signature: {}", e),
            RpcError::UnknownMethod(name) => write!(f, "Unknown method: {}", name),
            RpcError::Arguments(e) => write!(f, "Bad arguments: {}", e),
            RpcError::ReturnType { expected, found } => write!(
                f,
                "Method returned '{}', signature declares '{}'",
                found, expected
            ),
            RpcError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RpcError {}
