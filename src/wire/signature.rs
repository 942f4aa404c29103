//! Type signatures
//!
//! A signature is a string with one character per body value:
//!
//! ```text
//! b  boolean        1 byte
//! i  integer        i32
//! d  double         f64
//! c  character      1 byte
//! s  string         u32 length + UTF-8
//! B  bool array     u32 count + 1 byte each
//! I  int array      u32 count + i32 each
//! D  double array   u32 count + f64 each
//! x  raw buffer     u32 length + bytes
//! ```
//!
//! Method signatures prefix the return type: `i:ii` takes two integers and
//! returns one; `s:v` takes nothing.

use std::fmt;

use super::constants::{METHOD_SEPARATOR, VOID_PARAMS};
use crate::error::ProtocolError;

/// One signature character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Boolean,
    Integer,
    Double,
    Char,
    String,
    BooleanArray,
    IntegerArray,
    DoubleArray,
    Buffer,
}

impl TypeCode {
    pub fn from_char(c: char) -> Result<Self, ProtocolError> {
        Ok(match c {
            'b' => TypeCode::Boolean,
            'i' => TypeCode::Integer,
            'd' => TypeCode::Double,
            'c' => TypeCode::Char,
            's' => TypeCode::String,
            'B' => TypeCode::BooleanArray,
            'I' => TypeCode::IntegerArray,
            'D' => TypeCode::DoubleArray,
            'x' => TypeCode::Buffer,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }

    pub fn as_char(self) -> char {
        match self {
            TypeCode::Boolean => 'b',
            TypeCode::Integer => 'i',
            TypeCode::Double => 'd',
            TypeCode::Char => 'c',
            TypeCode::String => 's',
            TypeCode::BooleanArray => 'B',
            TypeCode::IntegerArray => 'I',
            TypeCode::DoubleArray => 'D',
            TypeCode::Buffer => 'x',
        }
    }

    /// Encoded width of a fixed-size value, or of one array element
    pub fn element_width(self) -> usize {
        match self {
            TypeCode::Boolean | TypeCode::Char | TypeCode::BooleanArray => 1,
            TypeCode::Integer | TypeCode::IntegerArray => 4,
            TypeCode::Double | TypeCode::DoubleArray => 8,
            TypeCode::String | TypeCode::Buffer => 1,
        }
    }

    /// `true` for types carrying their own u32 length or count prefix
    pub fn is_variable(self) -> bool {
        !matches!(
            self,
            TypeCode::Boolean | TypeCode::Integer | TypeCode::Double | TypeCode::Char
        )
    }
}

/// Validated body signature
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    codes: Vec<TypeCode>,
}

impl Signature {
    /// Parse a signature, rejecting unknown characters
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let codes = s
            .chars()
            .map(TypeCode::from_char)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { codes })
    }

    pub fn from_codes(codes: Vec<TypeCode>) -> Self {
        Self { codes }
    }

    pub fn codes(&self) -> &[TypeCode] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in &self.codes {
            write!(f, "{}", code.as_char())?;
        }
        Ok(())
    }
}

/// `ret:params` method signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub ret: TypeCode,
    pub params: Signature,
}

impl MethodSignature {
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidMethodSignature(s.to_string());

        let (ret, params) = s.split_once(METHOD_SEPARATOR).ok_or_else(invalid)?;
        let mut ret_chars = ret.chars();
        let ret = match (ret_chars.next(), ret_chars.next()) {
            (Some(c), None) => TypeCode::from_char(c)?,
            _ => return Err(invalid()),
        };

        let params = if params.len() == 1 && params.starts_with(VOID_PARAMS) {
            Signature::default()
        } else {
            Signature::parse(params)?
        };

        Ok(Self { ret, params })
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ret.as_char(), METHOD_SEPARATOR)?;
        if self.params.is_empty() {
            write!(f, "{}", VOID_PARAMS)
        } else {
            write!(f, "{}", self.params)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_codes() {
        let sig = Signature::parse("bidcsBIDx").unwrap();
        assert_eq!(sig.len(), 9);
        assert_eq!(sig.to_string(), "bidcsBIDx");
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(
            Signature::parse("iqs"),
            Err(ProtocolError::UnknownType('q'))
        );
    }

    #[test]
    fn test_empty_signature() {
        assert!(Signature::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_method_signature() {
        let sig = MethodSignature::parse("i:ii").unwrap();
        assert_eq!(sig.ret, TypeCode::Integer);
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.to_string(), "i:ii");
    }

    #[test]
    fn test_method_signature_void_params() {
        let sig = MethodSignature::parse("s:v").unwrap();
        assert!(sig.params.is_empty());
        assert_eq!(sig.to_string(), "s:v");

        assert!(MethodSignature::parse("s:").unwrap().params.is_empty());
    }

    #[test]
    fn test_method_signature_invalid() {
        assert!(MethodSignature::parse("ii").is_err());
        assert!(MethodSignature::parse("ii:i").is_err());
        assert!(MethodSignature::parse(":i").is_err());
        assert!(MethodSignature::parse("v:i").is_err());
        assert!(MethodSignature::parse("i:iz").is_err());
    }
}
