//! Protocol error types.
//!
//! The receive pipeline treats every variant here as a reason to drop the
//! offending frame; none of them crash the process. Variants are precise so
//! metrics can distinguish truncation from version mismatch from payload rot.

use thiserror::Error;

/// Convenience alias used throughout the codec.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding mesh frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed header.
    #[error("frame too short: got {actual} bytes, need at least {expected}")]
    FrameTooShort {
        /// Minimum byte count required.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Header carries a protocol version this build does not speak.
    #[error("unknown protocol version: {0}")]
    UnknownVersion(u8),

    /// Encoded frame would not fit the `u16` wire length prefix.
    #[error("frame too large: {size} bytes exceeds wire limit of {max}")]
    FrameTooLarge {
        /// Encoded size.
        size: usize,
        /// Hard wire limit.
        max: usize,
    },

    /// Body ends before the structure it claims to carry.
    #[error("truncated body: expected {expected} bytes, got {actual}")]
    BodyTruncated {
        /// Bytes the body structure requires.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Compressed payload did not inflate to a valid clear form.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Chat envelope failed to serialize.
    #[error("payload encode failed: {0}")]
    CborEncode(String),

    /// Chat envelope failed to deserialize.
    #[error("payload decode failed: {0}")]
    CborDecode(String),

    /// Caller asked to emit an encrypted frame without enabling encryption.
    #[error("payload encryption is not enabled")]
    EncryptionDisabled,

    /// Encrypted payload failed authentication or decryption.
    #[error("payload decryption failed")]
    DecryptionFailed,
}

impl ProtocolError {
    /// Whether this error means the frame itself was malformed on the wire.
    ///
    /// Malformed frames increment the receive-path drop metric; the other
    /// variants are caller-side encode failures.
    #[must_use]
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::UnknownVersion(_)
                | Self::BodyTruncated { .. }
                | Self::DecompressionFailed(_)
                | Self::CborDecode(_)
                | Self::DecryptionFailed
        )
    }
}
