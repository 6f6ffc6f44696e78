//! Error types for the Skywave engine core.
//!
//! The receive pipeline never propagates errors upward — every failure there
//! terminates in a counter or a log line. The variants here surface to
//! callers of sender-initiated operations (send, sync, store) where a
//! synchronous answer is owed.

use thiserror::Error;

/// Errors surfaced by engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Frame or payload construction failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] skywave_proto::ProtocolError),

    /// The node's role forbids the requested operation.
    #[error("operation not permitted in {mode} mode")]
    WrongMode {
        /// The active node mode.
        mode: &'static str,
    },

    /// A channel name was neither `#name` nor `@CALLSIGN`.
    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// The persistent store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from a chat store implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store is busy; the caller may retry briefly, then drops.
    #[error("store busy")]
    Busy,

    /// Underlying storage I/O failed.
    #[error("storage error: {0}")]
    Io(String),

    /// Stored data did not match the expected schema.
    #[error("corrupt store: {0}")]
    Corrupt(String),
}
