//! Error types
//!
//! Each layer has its own error enum; [`Error`] wraps them for the public API.

use std::fmt;
use std::io;

use crate::broker::ClientId;
use crate::registry::RegistryError;
use crate::rpc::RpcError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or backing-store I/O failure
    Io(io::Error),
    /// Malformed or unencodable message
    Protocol(ProtocolError),
    /// Buffer backing-store failure
    Buffer(BufferError),
    /// Service registry failure
    Registry(RegistryError),
    /// Broker bookkeeping failure
    Broker(BrokerError),
    /// Method table failure
    Rpc(RpcError),
    /// The peer answered a call with an error message
    Remote(String),
    /// The peer closed the connection
    ConnectionClosed,
    /// An operation did not complete in time
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Buffer(e) => write!(f, "Buffer error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Broker(e) => write!(f, "Broker error: {}", e),
            Error::Rpc(e) => write!(f, "RPC error: {}", e),
            Error::Remote(msg) => write!(f, "Remote error: {}", msg),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Buffer(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Broker(e) => Some(e),
            Error::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<BufferError> for Error {
    fn from(e: BufferError) -> Self {
        Error::Buffer(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<BrokerError> for Error {
    fn from(e: BrokerError) -> Self {
        Error::Broker(e)
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Error::Rpc(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Wire codec errors
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Signature character outside the known type set
    UnknownType(char),
    /// Message kind byte outside the known set
    UnknownKind(u8),
    /// Declared header length disagrees with its contents
    InvalidHeader(String),
    /// Number of values does not match the signature length
    ArgumentCount { expected: usize, actual: usize },
    /// A value does not match its signature character
    TypeMismatch { index: usize, expected: char, found: char },
    /// Return and error messages carry exactly one value
    InvalidArity { kind: char, count: usize },
    /// Declared size exceeds the maximum message size
    MessageTooLarge { size: usize, max: usize },
    /// A name or string field is not valid UTF-8
    InvalidUtf8,
    /// A field is too long for its length prefix
    FieldTooLong(usize),
    /// Method signature is not of the form `ret:params`
    InvalidMethodSignature(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownType(c) => {
                write!(f, "Unknown signature type '{}'", c.escape_default())
            }
            ProtocolError::UnknownKind(k) => write!(f, "Unknown message kind 0x{:02x}", k),
            ProtocolError::InvalidHeader(msg) => write!(f, "Invalid header: {}", msg),
            ProtocolError::ArgumentCount { expected, actual } => {
                write!(f, "Signature expects {} values, got {}", expected, actual)
            }
            ProtocolError::TypeMismatch { index, expected, found } => write!(
                f,
                "Value {} has type '{}', signature expects '{}'",
                index, found, expected
            ),
            ProtocolError::InvalidArity { kind, count } => {
                write!(f, "Message kind '{}' must carry one value, got {}", kind, count)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message size {} exceeds maximum {}", size, max)
            }
            ProtocolError::InvalidUtf8 => write!(f, "Invalid UTF-8 in message field"),
            ProtocolError::FieldTooLong(len) => write!(f, "Field of {} bytes is too long", len),
            ProtocolError::InvalidMethodSignature(sig) => {
                write!(f, "Invalid method signature: {}", sig)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Buffer backing-store errors
#[derive(Debug)]
pub enum BufferError {
    /// The backing store could not be created
    Allocation(io::Error),
    /// Positional read or metadata query failed
    Io(io::Error),
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Allocation(e) => write!(f, "Failed to allocate backing store: {}", e),
            BufferError::Io(e) => write!(f, "Backing store I/O failed: {}", e),
        }
    }
}

impl std::error::Error for BufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferError::Allocation(e) | BufferError::Io(e) => Some(e),
        }
    }
}

/// Broker errors
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// No service registered under this id
    UnknownService(String),
    /// No client stream with this id
    UnknownClient(ClientId),
    /// The client limit has been reached
    TooManyClients(usize),
    /// The client's transport cannot carry a subscription
    SubscribeUnsupported(ClientId),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::UnknownService(id) => write!(f, "Unknown service: {}", id),
            BrokerError::UnknownClient(id) => write!(f, "Unknown client: {}", id),
            BrokerError::TooManyClients(max) => write!(f, "Client limit of {} reached", max),
            BrokerError::SubscribeUnsupported(id) => {
                write!(f, "Client {} cannot subscribe over this transport", id)
            }
        }
    }
}

impl std::error::Error for BrokerError {}
