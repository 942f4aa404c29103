//! Resumable message parser
//!
//! One [`ParseState`] per connection. Bytes are fed as they arrive from
//! non-blocking reads; the state machine advances as far as the staged
//! bytes allow and resumes from the same point on the next feed.
//!
//! ```text
//!  FRAMING ──marker──► HEADER ──header──► BODY ──last value──► DONE
//!     ▲                                                         │
//!     └──────────────────── take_message() ─────────────────────┘
//!
//!  any state ──malformed──► ERROR        any state ──mark_eof──► EOF
//! ```
//!
//! Body values are consumed one at a time; a value whose bytes have not all
//! arrived stays staged and is decoded once they have.

use bytes::{Buf, Bytes, BytesMut};

use super::constants::*;
use super::message::{Message, MessageKind};
use super::signature::{Signature, TypeCode};
use super::value::Value;
use crate::error::ProtocolError;

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Searching for the frame marker
    Framing,
    /// Marker found, waiting for the complete header
    Header,
    /// Header parsed, decoding body values
    Body,
    /// A complete message is ready for [`ParseState::take_message`]
    Done,
    /// Malformed input; the connection should be closed
    Error,
    /// The peer closed the connection
    Eof,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Error | State::Eof)
    }
}

/// Message whose header has been parsed
#[derive(Debug)]
struct Partial {
    kind: MessageKind,
    name: String,
    signature: Signature,
    body: Vec<Value>,
    /// Encoded bytes consumed for this message so far
    size: usize,
}

/// Per-connection reassembly state
#[derive(Debug)]
pub struct ParseState {
    state: State,
    staged: BytesMut,
    partial: Option<Partial>,
    message: Option<Message>,
    error: Option<ProtocolError>,
    max_message_size: usize,
    eof_pending: bool,
}

impl ParseState {
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            state: State::Framing,
            staged: BytesMut::with_capacity(4096),
            partial: None,
            message: None,
            error: None,
            max_message_size,
            eof_pending: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Error that moved the parser into [`State::Error`]
    pub fn error(&self) -> Option<&ProtocolError> {
        self.error.as_ref()
    }

    /// Bytes received but not yet consumed
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Stage newly received bytes and advance as far as possible
    ///
    /// Input after a terminal state is ignored. While a message is waiting
    /// in [`State::Done`] the bytes are only staged.
    pub fn feed(&mut self, data: &[u8]) -> State {
        if self.state.is_terminal() {
            return self.state;
        }

        self.staged.extend_from_slice(data);
        if self.state != State::Done {
            self.advance();
        }
        self.state
    }

    /// Retrieve the completed message and start on the next one
    pub fn take_message(&mut self) -> Option<Message> {
        if self.state != State::Done {
            return None;
        }

        let message = self.message.take();
        if self.eof_pending {
            self.state = State::Eof;
        } else {
            self.state = State::Framing;
            self.advance();
        }
        message
    }

    /// Next completed message, or the error that stopped the parser
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.state {
            State::Done => Ok(self.take_message()),
            State::Error => Err(self
                .error
                .clone()
                .unwrap_or_else(|| ProtocolError::InvalidHeader("parser failed".into()))),
            _ => Ok(None),
        }
    }

    /// Record a clean close by the peer
    ///
    /// A message already in [`State::Done`] can still be taken.
    pub fn mark_eof(&mut self) {
        match self.state {
            State::Error | State::Eof => {}
            State::Done => self.eof_pending = true,
            state => {
                if state != State::Framing || !self.staged.is_empty() {
                    tracing::debug!(
                        state = ?state,
                        staged = self.staged.len(),
                        "Peer closed mid-message"
                    );
                }
                self.partial = None;
                self.state = State::Eof;
            }
        }
    }

    fn advance(&mut self) {
        loop {
            let progressed = match self.state {
                State::Framing => Ok(self.scan_marker()),
                State::Header => self.parse_header(),
                State::Body => self.parse_body(),
                State::Done | State::Error | State::Eof => return,
            };

            match progressed {
                Ok(true) => continue,
                Ok(false) => return,
                Err(e) => {
                    tracing::debug!(error = %e, "Parse failed");
                    self.partial = None;
                    self.error = Some(e);
                    self.state = State::Error;
                    return;
                }
            }
        }
    }

    fn scan_marker(&mut self) -> bool {
        if let Some(at) = self
            .staged
            .windows(FRAME_MARKER_BYTES.len())
            .position(|w| w == FRAME_MARKER_BYTES)
        {
            if at > 0 {
                tracing::debug!(discarded = at, "Resynchronized on frame marker");
            }
            self.staged.advance(at + FRAME_MARKER_BYTES.len());
            self.state = State::Header;
            return true;
        }

        // Keep a tail that could be the start of a split marker
        let keep = FRAME_MARKER_BYTES.len() - 1;
        if self.staged.len() > keep {
            let discard = self.staged.len() - keep;
            tracing::debug!(discarded = discard, "Discarding unframed bytes");
            self.staged.advance(discard);
        }
        false
    }

    fn parse_header(&mut self) -> Result<bool, ProtocolError> {
        if self.staged.len() < 2 {
            return Ok(false);
        }

        let header_len = u16::from_be_bytes([self.staged[0], self.staged[1]]) as usize;
        if header_len < MIN_HEADER_LEN {
            return Err(ProtocolError::InvalidHeader(format!(
                "header length {} below minimum {}",
                header_len, MIN_HEADER_LEN
            )));
        }
        if PREAMBLE_LEN + header_len > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: PREAMBLE_LEN + header_len,
                max: self.max_message_size,
            });
        }
        if self.staged.len() < 2 + header_len {
            return Ok(false);
        }

        let header = &self.staged[2..2 + header_len];
        let kind = MessageKind::from_byte(header[0])?;

        let name_len = u16::from_be_bytes([header[1], header[2]]) as usize;
        let sig_offset = 3 + name_len;
        if sig_offset + 2 > header_len {
            return Err(ProtocolError::InvalidHeader(format!(
                "name length {} overruns header length {}",
                name_len, header_len
            )));
        }
        let name = std::str::from_utf8(&header[3..sig_offset])
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .to_string();

        let sig_len = u16::from_be_bytes([header[sig_offset], header[sig_offset + 1]]) as usize;
        if sig_offset + 2 + sig_len != header_len {
            return Err(ProtocolError::InvalidHeader(format!(
                "declared header length {} does not match contents {}",
                header_len,
                sig_offset + 2 + sig_len
            )));
        }
        let sig = std::str::from_utf8(&header[sig_offset + 2..])
            .map_err(|_| ProtocolError::InvalidUtf8)?;
        let signature = Signature::parse(sig)?;

        if kind.is_single_valued() && signature.len() != 1 {
            return Err(ProtocolError::InvalidArity {
                kind: kind.as_byte() as char,
                count: signature.len(),
            });
        }

        self.staged.advance(2 + header_len);
        self.partial = Some(Partial {
            kind,
            name,
            body: Vec::with_capacity(signature.len()),
            signature,
            size: PREAMBLE_LEN + header_len,
        });
        self.state = State::Body;
        Ok(true)
    }

    fn parse_body(&mut self) -> Result<bool, ProtocolError> {
        let Some(partial) = self.partial.as_mut() else {
            return Err(ProtocolError::InvalidHeader("body without header".into()));
        };

        while partial.body.len() < partial.signature.len() {
            let code = partial.signature.codes()[partial.body.len()];
            match decode_value(code, &self.staged, partial.size, self.max_message_size)? {
                None => return Ok(false),
                Some((value, used)) => {
                    self.staged.advance(used);
                    partial.size += used;
                    partial.body.push(value);
                }
            }
        }

        if let Some(partial) = self.partial.take() {
            self.message = Some(Message {
                kind: partial.kind,
                name: partial.name,
                signature: partial.signature,
                body: partial.body,
            });
        }
        self.state = State::Done;
        Ok(false)
    }
}

impl Default for ParseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one value from the front of `buf`
///
/// Returns `None` if more bytes are needed. Fails once the declared size
/// would push the message past `max`, without waiting for the bytes.
fn decode_value(
    code: TypeCode,
    buf: &[u8],
    consumed: usize,
    max: usize,
) -> Result<Option<(Value, usize)>, ProtocolError> {
    let width = code.element_width();

    let (total, count) = if code.is_variable() {
        ensure_fits(consumed + 4, max)?;
        if buf.len() < 4 {
            return Ok(None);
        }
        let count = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let total = count
            .checked_mul(width)
            .and_then(|n| n.checked_add(4))
            .ok_or(ProtocolError::MessageTooLarge { size: usize::MAX, max })?;
        (total, count)
    } else {
        (width, 1)
    };

    ensure_fits(consumed.saturating_add(total), max)?;
    if buf.len() < total {
        return Ok(None);
    }

    let mut data = &buf[..total];
    let value = match code {
        TypeCode::Boolean => Value::Boolean(data.get_u8() != 0),
        TypeCode::Integer => Value::Integer(data.get_i32()),
        TypeCode::Double => Value::Double(data.get_f64()),
        TypeCode::Char => Value::Char(data.get_u8()),
        TypeCode::String => {
            data.advance(4);
            let s = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
            Value::String(s.to_string())
        }
        TypeCode::BooleanArray => {
            data.advance(4);
            Value::BooleanArray(data.iter().map(|&b| b != 0).collect())
        }
        TypeCode::IntegerArray => {
            data.advance(4);
            Value::IntegerArray((0..count).map(|_| data.get_i32()).collect())
        }
        TypeCode::DoubleArray => {
            data.advance(4);
            Value::DoubleArray((0..count).map(|_| data.get_f64()).collect())
        }
        TypeCode::Buffer => {
            data.advance(4);
            Value::Buffer(Bytes::copy_from_slice(data))
        }
    };

    Ok(Some((value, total)))
}

fn ensure_fits(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::MessageTooLarge { size, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::wire::encoder::encode;

    fn sample() -> Message {
        Message::call(
            "probe",
            vec![
                Value::Boolean(false),
                Value::Integer(i32::MIN),
                Value::Double(-1.5e9),
                Value::Char(b'#'),
                Value::String("status: ok".into()),
                Value::BooleanArray(vec![false, true]),
                Value::IntegerArray(vec![7, 8, 9]),
                Value::DoubleArray(vec![]),
                Value::Buffer(Bytes::from_static(b"\x00\x01\x02")),
            ],
        )
    }

    /// Hand-built frame, bypassing encoder validation
    fn raw_frame(kind: u8, name: &str, sig: &str, body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(FRAME_MARKER);
        buf.put_u16((MIN_HEADER_LEN + name.len() + sig.len()) as u16);
        buf.put_u8(kind);
        buf.put_u16(name.len() as u16);
        buf.put_slice(name.as_bytes());
        buf.put_u16(sig.len() as u16);
        buf.put_slice(sig.as_bytes());
        buf.put_slice(body);
        buf.to_vec()
    }

    #[test]
    fn test_round_trip() {
        let msg = sample();
        let bytes = msg.encode().unwrap();

        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&bytes), State::Done);
        assert_eq!(parser.take_message().unwrap(), msg);
        assert_eq!(parser.state(), State::Framing);
        assert_eq!(parser.staged_len(), 0);
    }

    #[test]
    fn test_split_at_every_offset() {
        let msg = sample();
        let bytes = msg.encode().unwrap();

        for split in 0..=bytes.len() {
            let mut parser = ParseState::new();
            parser.feed(&bytes[..split]);
            if split < bytes.len() {
                assert_ne!(parser.state(), State::Done, "split at {}", split);
            }
            parser.feed(&bytes[split..]);
            assert_eq!(parser.state(), State::Done, "split at {}", split);
            assert_eq!(parser.take_message().unwrap(), msg, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let msg = Message::event("imu", 42, Bytes::from_static(b"sample"));
        let bytes = msg.encode().unwrap();

        let mut parser = ParseState::new();
        for b in bytes.iter() {
            parser.feed(std::slice::from_ref(b));
        }
        assert_eq!(parser.take_message().unwrap(), msg);
    }

    #[test]
    fn test_back_to_back_messages() {
        let first = Message::call("heartbeat", vec![]);
        let second = Message::call("subscribe", vec![Value::from("imu")]);

        let mut bytes = first.encode().unwrap().to_vec();
        bytes.extend_from_slice(&second.encode().unwrap());

        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&bytes), State::Done);
        assert_eq!(parser.take_message().unwrap(), first);

        // The second message was staged and parses on acknowledgement
        assert_eq!(parser.state(), State::Done);
        assert_eq!(parser.take_message().unwrap(), second);
        assert_eq!(parser.state(), State::Framing);
    }

    #[test]
    fn test_bytes_staged_while_done() {
        let msg = Message::call("list", vec![]);
        let bytes = msg.encode().unwrap();

        let mut parser = ParseState::new();
        parser.feed(&bytes);
        parser.feed(&bytes[..5]);
        assert_eq!(parser.state(), State::Done);

        parser.take_message().unwrap();
        assert_eq!(parser.state(), State::Header);
        parser.feed(&bytes[5..]);
        assert_eq!(parser.take_message().unwrap(), msg);
    }

    #[test]
    fn test_resync_after_garbage() {
        let msg = Message::call("heartbeat", vec![]);
        let mut bytes = vec![0x00, 0xA5, 0xA5, 0x13, 0x37, 0x42];
        bytes.extend_from_slice(&msg.encode().unwrap());

        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&bytes), State::Done);
        assert_eq!(parser.take_message().unwrap(), msg);
    }

    #[test]
    fn test_marker_split_across_feeds() {
        let msg = Message::call("heartbeat", vec![]);
        let encoded = msg.encode().unwrap();

        let mut parser = ParseState::new();
        let mut first = vec![0xFF; 100];
        first.extend_from_slice(&encoded[..3]);
        assert_eq!(parser.feed(&first), State::Framing);
        assert_eq!(parser.staged_len(), 3);

        assert_eq!(parser.feed(&encoded[3..]), State::Done);
        assert_eq!(parser.take_message().unwrap(), msg);
    }

    #[test]
    fn test_garbage_never_errors() {
        let mut parser = ParseState::new();
        for _ in 0..100 {
            assert_eq!(parser.feed(&[0x11; 512]), State::Framing);
        }
        assert!(parser.staged_len() < FRAME_MARKER_BYTES.len());
    }

    #[test]
    fn test_unknown_signature_character() {
        let frame = raw_frame(b'M', "m", "iq", &[0, 0, 0, 1, 0]);

        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&frame), State::Error);
        assert_eq!(parser.error(), Some(&ProtocolError::UnknownType('q')));
        assert!(parser.take_message().is_none());

        // Terminal: later input is ignored
        assert_eq!(
            parser.feed(&Message::call("list", vec![]).encode().unwrap()),
            State::Error
        );
    }

    #[test]
    fn test_unknown_kind() {
        let frame = raw_frame(b'Q', "m", "", &[]);
        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&frame), State::Error);
        assert_eq!(parser.error(), Some(&ProtocolError::UnknownKind(b'Q')));
    }

    #[test]
    fn test_oversized_declared_length() {
        let mut body = Vec::new();
        body.extend_from_slice(&(1_000_000u32).to_be_bytes());
        let frame = raw_frame(b'M', "m", "x", &body);

        let mut parser = ParseState::with_max_message_size(1024);
        assert_eq!(parser.feed(&frame), State::Error);
        assert!(matches!(
            parser.error(),
            Some(ProtocolError::MessageTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn test_oversized_header() {
        let frame = raw_frame(b'M', &"n".repeat(200), "", &[]);
        let mut parser = ParseState::with_max_message_size(64);
        assert_eq!(parser.feed(&frame), State::Error);
    }

    #[test]
    fn test_inconsistent_header_length() {
        let mut frame = raw_frame(b'M', "abc", "i", &[0, 0, 0, 1]);
        // Claim a longer name than the header holds
        frame[8] = 10;
        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&frame), State::Error);
        assert!(matches!(
            parser.error(),
            Some(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_return_with_two_values_rejected() {
        let frame = raw_frame(b'R', "m", "ii", &[0, 0, 0, 1, 0, 0, 0, 2]);
        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&frame), State::Error);
    }

    #[test]
    fn test_invalid_utf8_string() {
        let frame = raw_frame(b'M', "m", "s", &[0, 0, 0, 2, 0xff, 0xfe]);
        let mut parser = ParseState::new();
        assert_eq!(parser.feed(&frame), State::Error);
        assert_eq!(parser.error(), Some(&ProtocolError::InvalidUtf8));
    }

    #[test]
    fn test_eof_mid_message() {
        let bytes = sample().encode().unwrap();
        let mut parser = ParseState::new();
        parser.feed(&bytes[..bytes.len() / 2]);
        parser.mark_eof();
        assert_eq!(parser.state(), State::Eof);
        assert!(parser.take_message().is_none());
    }

    #[test]
    fn test_eof_after_complete_message() {
        let msg = Message::call("goodbye", vec![]);
        let mut parser = ParseState::new();
        parser.feed(&msg.encode().unwrap());
        parser.mark_eof();

        assert_eq!(parser.state(), State::Done);
        assert_eq!(parser.take_message().unwrap(), msg);
        assert_eq!(parser.state(), State::Eof);
    }

    #[test]
    fn test_next_message() {
        let bytes = encode(MessageKind::Return, "add", "i", &[Value::Integer(3)]).unwrap();
        let mut parser = ParseState::new();

        assert_eq!(parser.next_message(), Ok(None));
        parser.feed(&bytes);
        let msg = parser.next_message().unwrap().unwrap();
        assert_eq!(msg.value(), Some(&Value::Integer(3)));

        parser.feed(&raw_frame(b'M', "m", "z", &[]));
        assert_eq!(parser.next_message(), Err(ProtocolError::UnknownType('z')));
    }
}
