//! Error types for ring and producer operations.

use thiserror::Error;

/// Errors surfaced by [`crate::Ring`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// An offset/length pair does not fit the supplied buffer, or a
    /// construction parameter (e.g. capacity) was invalid.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable description of what was invalid.
        reason: &'static str,
    },

    /// A blocking operation observed its [`crate::CancellationToken`] set.
    #[error("operation cancelled")]
    Cancelled,
}

/// Errors surfaced by producer-side entropy sources.
#[derive(Debug, Clone, Error)]
pub enum ProducerError {
    /// The entropy source failed to fill the staging buffer.
    #[error("entropy source failed: {0}")]
    Source(String),
}
