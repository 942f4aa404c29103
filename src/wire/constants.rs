//! Wire protocol constants

/// Marker that starts every message, used to resynchronize after corruption
pub const FRAME_MARKER: u32 = 0xA5A5_A5A5;

/// [`FRAME_MARKER`] as it appears on the wire
pub const FRAME_MARKER_BYTES: [u8; 4] = FRAME_MARKER.to_be_bytes();

/// Marker (4) + header length field (2)
pub const PREAMBLE_LEN: usize = 6;

/// Smallest valid header: kind (1) + name length (2) + signature length (2)
pub const MIN_HEADER_LEN: usize = 5;

/// Default maximum size of one encoded message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Signature of broker data events: timestamp (µs) and payload
pub const DATA_SIGNATURE: &str = "dx";

/// Method signature placeholder for an empty parameter list
pub const VOID_PARAMS: char = 'v';

/// Separator between return type and parameters in a method signature
pub const METHOD_SEPARATOR: char = ':';

// Message kinds
pub const KIND_CALL: u8 = b'M';
pub const KIND_RETURN: u8 = b'R';
pub const KIND_ERROR: u8 = b'E';
pub const KIND_EVENT: u8 = b'D';

// Control-plane method names
pub const CMD_SUBSCRIBE: &str = "subscribe";
pub const CMD_UNSUBSCRIBE: &str = "unsubscribe";
pub const CMD_HEARTBEAT: &str = "heartbeat";
pub const CMD_LIST: &str = "list";
pub const CMD_GOODBYE: &str = "goodbye";

/// All control-plane names; method tables may not register these
pub const RESERVED_METHODS: [&str; 5] = [
    CMD_SUBSCRIBE,
    CMD_UNSUBSCRIBE,
    CMD_HEARTBEAT,
    CMD_LIST,
    CMD_GOODBYE,
];
