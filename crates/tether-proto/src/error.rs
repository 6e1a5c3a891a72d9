//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed (malformed or unexpected shape).
    #[error("decode failed: {0}")]
    Decode(String),

    /// Frame body exceeds [`crate::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared or actual body size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Fewer bytes than a header or declared body.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtoError::FrameTooLarge { size: 10, max: 4 };
        assert_eq!(err.to_string(), "frame too large: 10 bytes (max 4)");
    }
}
