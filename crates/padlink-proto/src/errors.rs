//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire packets.
///
/// Framing errors (`FrameTooShort`, `SizeMismatch`, `SizeFieldTooSmall`,
/// `FrameOversize`) are fatal for the connection that produced them; body
/// errors are per-frame and answered with an `Error` reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed packet header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes available.
        actual: usize,
    },

    /// The header `size` field does not match the received frame length.
    #[error("frame size field claims {claimed} bytes but {actual} were received")]
    SizeMismatch {
        /// Value of the header `size` field.
        claimed: usize,
        /// Bytes actually received for this frame.
        actual: usize,
    },

    /// The header `size` field is smaller than the header itself.
    #[error("frame size field {size} is smaller than the {header}-byte header")]
    SizeFieldTooSmall {
        /// Value of the header `size` field.
        size: u16,
        /// Size of the packet header.
        header: usize,
    },

    /// Frame would exceed the u16 `size` field.
    #[error("frame of {size} bytes exceeds the {max}-byte limit")]
    FrameOversize {
        /// Total frame size that was requested.
        size: usize,
        /// Maximum encodable frame size.
        max: usize,
    },

    /// Body ended before a fixed-size field could be read.
    #[error("truncated body: needed {needed} more bytes")]
    TruncatedBody {
        /// Number of missing bytes.
        needed: usize,
    },

    /// Body contained bytes past the last expected field.
    #[error("{0} unparsed bytes at end of body")]
    TrailingBytes(usize),

    /// A string field is not valid UTF-8.
    #[error("body string is not valid UTF-8")]
    InvalidString,

    /// Frame kind is not known to this protocol.
    #[error("unknown packet kind {0}")]
    UnknownKind(u16),

    /// Frame kind differs from the one the payload decoder expects.
    #[error("unexpected packet kind {actual}, expected {expected}")]
    KindMismatch {
        /// Kind the decoder was built for.
        expected: u16,
        /// Kind found in the frame header.
        actual: u16,
    },
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
