//! Storage-specific error types.
//!
//! Every write to the remote store returns [`StoreError`] on failure. The
//! variant decides whether the batch writer retries the flush.

use thiserror::Error;

/// Errors returned by a [`RemoteStore`](crate::storage::RemoteStore) write.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request did not complete within the client timeout.
    #[error("write timed out")]
    Timeout,

    /// Connection-level failure (DNS, refused, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Credentials were missing or rejected.
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// The store failed or asked us to back off (5xx, 429, 408).
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The store refused the payload itself (other 4xx).
    #[error("write rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Records could not be encoded for the wire.
    #[error("encode error: {0}")]
    Encode(String),
}

impl StoreError {
    /// Whether repeating the same write could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network(_) | Self::Server { .. }
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth { status, message },
            408 | 429 | 500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}
