//! Wire codec
//!
//! Every message is a frame marker, a small header and a body laid out by
//! the header's type signature:
//!
//! ```text
//! +------------+------------+------+----------+------+---------+-----+------+
//! | 0xA5A5A5A5 | header len | kind | name len | name | sig len | sig | body |
//! |    u32     |    u16     |  u8  |   u16    |      |   u16   |     |      |
//! +------------+------------+------+----------+------+---------+-----+------+
//! ```
//!
//! All integers are big-endian. See [`signature`] for the body encodings.

pub mod constants;
pub mod encoder;
pub mod message;
pub mod parser;
pub mod signature;
pub mod value;

pub use encoder::{encode, encode_data_prefix, encode_iter, MessageBuilder};
pub use message::{Message, MessageKind};
pub use parser::{ParseState, State};
pub use signature::{MethodSignature, Signature, TypeCode};
pub use value::Value;
