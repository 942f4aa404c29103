//! Protocol messages

use std::fmt;

use bytes::Bytes;

use super::constants::*;
use super::encoder;
use super::signature::Signature;
use super::value::Value;
use crate::error::ProtocolError;

/// Message kind byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Method call (`'M'`)
    Call,
    /// Method return value (`'R'`)
    Return,
    /// Error reply (`'E'`)
    Error,
    /// Published data or client data (`'D'`)
    Event,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        match b {
            KIND_CALL => Ok(MessageKind::Call),
            KIND_RETURN => Ok(MessageKind::Return),
            KIND_ERROR => Ok(MessageKind::Error),
            KIND_EVENT => Ok(MessageKind::Event),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            MessageKind::Call => KIND_CALL,
            MessageKind::Return => KIND_RETURN,
            MessageKind::Error => KIND_ERROR,
            MessageKind::Event => KIND_EVENT,
        }
    }

    /// Return and error messages carry exactly one value
    pub fn is_single_valued(self) -> bool {
        matches!(self, MessageKind::Return | MessageKind::Error)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// A decoded or to-be-encoded message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    /// Method or service identifier
    pub name: String,
    pub signature: Signature,
    pub body: Vec<Value>,
}

impl Message {
    /// Build a message whose signature is derived from its values
    pub fn new(kind: MessageKind, name: impl Into<String>, body: Vec<Value>) -> Self {
        let signature = Signature::from_codes(body.iter().map(Value::type_code).collect());
        Self {
            kind,
            name: name.into(),
            signature,
            body,
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(MessageKind::Call, name, args)
    }

    pub fn return_value(name: impl Into<String>, value: Value) -> Self {
        Self::new(MessageKind::Return, name, vec![value])
    }

    pub fn error(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, name, vec![Value::String(reason.into())])
    }

    /// Data event for `service` with a timestamp in microseconds
    pub fn event(service: impl Into<String>, timestamp_us: u64, payload: Bytes) -> Self {
        Self::new(
            MessageKind::Event,
            service,
            vec![Value::Double(timestamp_us as f64), Value::Buffer(payload)],
        )
    }

    /// Timestamp and payload of a `dx` data event
    pub fn as_event(&self) -> Option<(u64, &Bytes)> {
        if self.kind != MessageKind::Event {
            return None;
        }
        match self.body.as_slice() {
            [Value::Double(ts), Value::Buffer(payload)] => Some((*ts as u64, payload)),
            _ => None,
        }
    }

    /// First body value, the payload of return and error messages
    pub fn value(&self) -> Option<&Value> {
        self.body.first()
    }

    /// Check counts and types against the signature
    pub fn validate(&self) -> Result<(), ProtocolError> {
        encoder::check_body(self.kind, &self.signature, self.body.iter())
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        encoder::encode_with_signature(self.kind, &self.name, &self.signature, self.body.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes() {
        for kind in [
            MessageKind::Call,
            MessageKind::Return,
            MessageKind::Error,
            MessageKind::Event,
        ] {
            assert_eq!(MessageKind::from_byte(kind.as_byte()).unwrap(), kind);
        }
        assert_eq!(
            MessageKind::from_byte(b'Z'),
            Err(ProtocolError::UnknownKind(b'Z'))
        );
    }

    #[test]
    fn test_signature_derived_from_body() {
        let msg = Message::call("add", vec![Value::Integer(1), Value::Double(2.0)]);
        assert_eq!(msg.signature.to_string(), "id");
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_event_accessor() {
        let msg = Message::event("imu", 1_500, Bytes::from_static(b"xyz"));
        let (ts, payload) = msg.as_event().unwrap();
        assert_eq!(ts, 1_500);
        assert_eq!(payload.as_ref(), b"xyz");

        assert!(Message::call("imu", vec![]).as_event().is_none());
    }

    #[test]
    fn test_event_accessor_mismatched_body() {
        let mut msg = Message::event("imu", 1_500, Bytes::from_static(b"xyz"));
        msg.body.truncate(1);
        assert!(msg.as_event().is_none());

        msg.body = vec![];
        assert!(msg.as_event().is_none());

        msg.body = vec![Value::Buffer(Bytes::from_static(b"xyz")), Value::Double(1.0)];
        assert!(msg.as_event().is_none());
    }

    #[test]
    fn test_return_arity() {
        let mut msg = Message::return_value("add", Value::Integer(3));
        assert!(msg.validate().is_ok());

        msg.body.push(Value::Integer(4));
        msg.signature = Signature::parse("ii").unwrap();
        assert!(matches!(
            msg.validate(),
            Err(ProtocolError::InvalidArity { .. })
        ));
    }
}
