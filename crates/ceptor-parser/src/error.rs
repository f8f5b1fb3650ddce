//! Error types for body parsers.
//!
//! These never leave the crate boundary as errors: the dispatcher turns
//! them into an invalid [`crate::ParsedBody`] carrying the message.

use thiserror::Error;

/// Errors raised while decoding a body.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Body is not valid UTF-8 where text was required.
    #[error("Invalid UTF-8 at byte {0}")]
    InvalidUtf8(usize),

    /// Structural error in a text format.
    #[error("Malformed {format}: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },

    /// Multipart body without a usable boundary.
    #[error("Missing multipart boundary")]
    MissingBoundary,

    /// Input ended in the middle of a value.
    #[error("Unexpected end of input at offset {0}")]
    Truncated(usize),

    /// Protobuf wire type 6 or 7.
    #[error("Invalid wire type {wire_type} at offset {offset}")]
    InvalidWireType { wire_type: u8, offset: usize },

    /// Protobuf field number outside 1..=2^29-1.
    #[error("Invalid field number {number} at offset {offset}")]
    InvalidFieldNumber { number: u64, offset: usize },

    /// Varint longer than ten bytes.
    #[error("Varint too long at offset {0}")]
    VarintOverflow(usize),

    /// JSON syntax error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ParseError {
    pub(crate) fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            message: message.into(),
        }
    }
}

impl From<std::str::Utf8Error> for ParseError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::InvalidUtf8(e.valid_up_to())
    }
}

/// Result type for parser internals.
pub type Result<T> = std::result::Result<T, ParseError>;
