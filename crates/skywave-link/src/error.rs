//! Link layer errors.

use thiserror::Error;

/// Errors from link I/O and admission.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Socket-level failure; the link closes and reconnects.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded what the `u16` length prefix can carry.
    #[error("frame of {0} bytes exceeds the wire limit")]
    FrameTooLarge(usize),

    /// The peer failed the link-local password handshake; the connection
    /// is not admitted.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Closed,
}
