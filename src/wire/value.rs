//! Typed message values

use bytes::Bytes;

use super::signature::TypeCode;

/// One value in a message body
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Double(f64),
    Char(u8),
    String(String),
    BooleanArray(Vec<bool>),
    IntegerArray(Vec<i32>),
    DoubleArray(Vec<f64>),
    Buffer(Bytes),
}

impl Value {
    /// Signature code for this value
    pub fn type_code(&self) -> TypeCode {
        match self {
            Value::Boolean(_) => TypeCode::Boolean,
            Value::Integer(_) => TypeCode::Integer,
            Value::Double(_) => TypeCode::Double,
            Value::Char(_) => TypeCode::Char,
            Value::String(_) => TypeCode::String,
            Value::BooleanArray(_) => TypeCode::BooleanArray,
            Value::IntegerArray(_) => TypeCode::IntegerArray,
            Value::DoubleArray(_) => TypeCode::DoubleArray,
            Value::Buffer(_) => TypeCode::Buffer,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Bytes> {
        match self {
            Value::Buffer(b) => Some(b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::BooleanArray(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::IntegerArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::DoubleArray(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Buffer(v)
    }
}
