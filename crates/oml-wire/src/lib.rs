//! Wire-level framing shared by both ends of the pipeline: the session
//! header block exchanged once at connection start, and the two body
//! encodings (`text` and `binary`) used for every measurement row after it.

mod binary;
mod header;
mod text;

pub use binary::{peek_stream_index as peek_stream_index_binary, read_binary_message, write_binary_message};
pub use header::{HeaderLine, HeaderTag, parse_header_line};
pub use text::{peek_stream_index as peek_stream_index_text, read_text_message, write_text_message};

use std::fmt;

/// A single decoded measurement row, independent of which body encoding
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub stream_index: u32,
    pub sequence: u64,
    pub timestamp: f64,
    pub values: Vec<oml_types::TypedValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    Text,
    Binary,
}

impl ContentMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentMode::Text),
            "binary" => Some(ContentMode::Binary),
            _ => None,
        }
    }
}

/// Outcome of trying to decode one message out of a buffer that may not
/// yet hold a complete one.
#[derive(Debug)]
pub enum ReadOutcome {
    Message(Message),
    /// Not enough bytes buffered yet; the caller should read more from the
    /// transport and retry. The buffer's read cursor has already been
    /// rewound to the start of the attempt.
    NeedMoreData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A header line had no recognized tag, or its syntax didn't match
    /// `tag: value` (or `tag : value`, with optional space before the colon).
    MalformedHeader(String),
    /// A text row didn't have the minimum three leading fields, or a field
    /// failed to parse as the type the schema says it should be.
    MalformedTextRow(String),
    /// The binary stream has no sync sequence left to find; the
    /// connection is unrecoverable until the peer reconnects.
    SyncLost,
    /// A binary value tag byte didn't match any of the known type codes.
    UnknownTypeTag(u8),
    /// The frame's declared value count doesn't match the schema bound to
    /// its stream index.
    FieldCountMismatch { expected: usize, found: u8 },
    BufferError(oml_buffer::BufferError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MalformedHeader(s) => write!(f, "malformed header line: {s:?}"),
            CodecError::MalformedTextRow(s) => write!(f, "malformed text row: {s:?}"),
            CodecError::SyncLost => write!(f, "lost synchronization with binary stream"),
            CodecError::UnknownTypeTag(tag) => write!(f, "unknown binary type tag 0x{tag:02x}"),
            CodecError::FieldCountMismatch { expected, found } => {
                write!(f, "frame declared {found} values, schema expects {expected}")
            }
            CodecError::BufferError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<oml_buffer::BufferError> for CodecError {
    fn from(e: oml_buffer::BufferError) -> Self {
        CodecError::BufferError(e)
    }
}
