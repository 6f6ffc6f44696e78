//! Daemon error types.

use thiserror::Error;

/// Fatal daemon errors. Only startup failures reach the exit code; the
/// running receive path never surfaces errors upward.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Bad or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The chat store could not be opened or migrated.
    #[error("store error: {0}")]
    Store(#[from] skywave_core::StoreError),

    /// A link-layer component failed to start.
    #[error("link error: {0}")]
    Link(#[from] skywave_link::LinkError),
}
