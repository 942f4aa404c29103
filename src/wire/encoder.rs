//! Message encoder
//!
//! Three entry points produce byte-identical output for equal content:
//!
//! - [`encode`]: signature string plus a pre-typed value slice
//! - [`encode_iter`]: signature string plus any iterator of values
//! - [`MessageBuilder`]: typed builder that derives the signature itself
//!
//! All three funnel into [`encode_with_signature`].

use std::borrow::Borrow;

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use super::message::{Message, MessageKind};
use super::signature::{Signature, TypeCode};
use super::value::Value;
use crate::error::ProtocolError;

/// Encode a message from a signature and a slice of values
pub fn encode(
    kind: MessageKind,
    name: &str,
    signature: &str,
    values: &[Value],
) -> Result<Bytes, ProtocolError> {
    encode_iter(kind, name, signature, values)
}

/// Encode a message from a signature and an iterator of values
pub fn encode_iter<I, V>(
    kind: MessageKind,
    name: &str,
    signature: &str,
    values: I,
) -> Result<Bytes, ProtocolError>
where
    I: IntoIterator<Item = V>,
    V: Borrow<Value>,
{
    let signature = Signature::parse(signature)?;
    encode_with_signature(kind, name, &signature, values)
}

pub(crate) fn encode_with_signature<I, V>(
    kind: MessageKind,
    name: &str,
    signature: &Signature,
    values: I,
) -> Result<Bytes, ProtocolError>
where
    I: IntoIterator<Item = V>,
    V: Borrow<Value>,
{
    check_arity(kind, signature.len())?;

    let mut buf = BytesMut::with_capacity(64);
    write_header(&mut buf, kind, name, signature)?;

    let codes = signature.codes();
    let mut count = 0;
    for value in values {
        let value = value.borrow();
        if let Some(&expected) = codes.get(count) {
            check_type(count, expected, value)?;
            write_value(&mut buf, value)?;
        }
        count += 1;
    }

    if count != codes.len() {
        return Err(ProtocolError::ArgumentCount {
            expected: codes.len(),
            actual: count,
        });
    }

    Ok(buf.freeze())
}

/// Encode everything of a `dx` data event except the payload bytes
///
/// The result ends with the payload's length prefix; writing `payload_len`
/// bytes after it completes the message.
pub fn encode_data_prefix(
    service: &str,
    timestamp_us: u64,
    payload_len: usize,
) -> Result<Bytes, ProtocolError> {
    let signature = Signature::from_codes(vec![TypeCode::Double, TypeCode::Buffer]);
    let len = u32::try_from(payload_len).map_err(|_| ProtocolError::FieldTooLong(payload_len))?;

    let mut buf = BytesMut::with_capacity(PREAMBLE_LEN + MIN_HEADER_LEN + service.len() + 16);
    write_header(&mut buf, MessageKind::Event, service, &signature)?;
    buf.put_f64(timestamp_us as f64);
    buf.put_u32(len);
    Ok(buf.freeze())
}

pub(crate) fn check_body<'a>(
    kind: MessageKind,
    signature: &Signature,
    values: impl Iterator<Item = &'a Value>,
) -> Result<(), ProtocolError> {
    check_arity(kind, signature.len())?;

    let codes = signature.codes();
    let mut count = 0;
    for value in values {
        if let Some(&expected) = codes.get(count) {
            check_type(count, expected, value)?;
        }
        count += 1;
    }

    if count != codes.len() {
        return Err(ProtocolError::ArgumentCount {
            expected: codes.len(),
            actual: count,
        });
    }
    Ok(())
}

fn check_arity(kind: MessageKind, count: usize) -> Result<(), ProtocolError> {
    if kind.is_single_valued() && count != 1 {
        return Err(ProtocolError::InvalidArity {
            kind: kind.as_byte() as char,
            count,
        });
    }
    Ok(())
}

fn check_type(index: usize, expected: TypeCode, value: &Value) -> Result<(), ProtocolError> {
    let found = value.type_code();
    if found != expected {
        return Err(ProtocolError::TypeMismatch {
            index,
            expected: expected.as_char(),
            found: found.as_char(),
        });
    }
    Ok(())
}

fn write_header(
    buf: &mut BytesMut,
    kind: MessageKind,
    name: &str,
    signature: &Signature,
) -> Result<(), ProtocolError> {
    let sig = signature.to_string();
    let name_len = checked_u16(name.len())?;
    let sig_len = checked_u16(sig.len())?;
    let header_len = checked_u16(MIN_HEADER_LEN + name.len() + sig.len())?;

    buf.put_u32(FRAME_MARKER);
    buf.put_u16(header_len);
    buf.put_u8(kind.as_byte());
    buf.put_u16(name_len);
    buf.put_slice(name.as_bytes());
    buf.put_u16(sig_len);
    buf.put_slice(sig.as_bytes());
    Ok(())
}

fn write_value(buf: &mut BytesMut, value: &Value) -> Result<(), ProtocolError> {
    match value {
        Value::Boolean(b) => buf.put_u8(*b as u8),
        Value::Integer(i) => buf.put_i32(*i),
        Value::Double(d) => buf.put_f64(*d),
        Value::Char(c) => buf.put_u8(*c),
        Value::String(s) => {
            buf.put_u32(checked_u32(s.len())?);
            buf.put_slice(s.as_bytes());
        }
        Value::BooleanArray(items) => {
            buf.put_u32(checked_u32(items.len())?);
            for b in items {
                buf.put_u8(*b as u8);
            }
        }
        Value::IntegerArray(items) => {
            buf.put_u32(checked_u32(items.len())?);
            for i in items {
                buf.put_i32(*i);
            }
        }
        Value::DoubleArray(items) => {
            buf.put_u32(checked_u32(items.len())?);
            for d in items {
                buf.put_f64(*d);
            }
        }
        Value::Buffer(bytes) => {
            buf.put_u32(checked_u32(bytes.len())?);
            buf.put_slice(bytes);
        }
    }
    Ok(())
}

fn checked_u16(len: usize) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::FieldTooLong(len))
}

fn checked_u32(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::FieldTooLong(len))
}

/// Typed message builder
///
/// Each typed setter appends one value and its signature character, so the
/// signature can never disagree with the values.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    kind: MessageKind,
    name: String,
    signature: String,
    values: Vec<Value>,
}

impl MessageBuilder {
    pub fn new(kind: MessageKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            signature: String::new(),
            values: Vec::new(),
        }
    }

    pub fn call(name: impl Into<String>) -> Self {
        Self::new(MessageKind::Call, name)
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self::new(MessageKind::Event, name)
    }

    pub fn value(mut self, value: Value) -> Self {
        self.signature.push(value.type_code().as_char());
        self.values.push(value);
        self
    }

    pub fn boolean(self, v: bool) -> Self {
        self.value(Value::Boolean(v))
    }

    pub fn integer(self, v: i32) -> Self {
        self.value(Value::Integer(v))
    }

    pub fn double(self, v: f64) -> Self {
        self.value(Value::Double(v))
    }

    pub fn char(self, v: u8) -> Self {
        self.value(Value::Char(v))
    }

    pub fn string(self, v: impl Into<String>) -> Self {
        self.value(Value::String(v.into()))
    }

    pub fn boolean_array(self, v: Vec<bool>) -> Self {
        self.value(Value::BooleanArray(v))
    }

    pub fn integer_array(self, v: Vec<i32>) -> Self {
        self.value(Value::IntegerArray(v))
    }

    pub fn double_array(self, v: Vec<f64>) -> Self {
        self.value(Value::DoubleArray(v))
    }

    pub fn buffer(self, v: Bytes) -> Self {
        self.value(Value::Buffer(v))
    }

    /// Signature accumulated so far
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        encode(self.kind, &self.name, &self.signature, &self.values)
    }

    pub fn build(self) -> Message {
        Message::new(self.kind, self.name, self.values)
    }
}
