//! Error types for the durable primitives.

use swarm_store::StoreError;
use thiserror::Error;

/// Errors from cursors, deferreds, mailboxes and asks.
#[derive(Debug, Error)]
pub enum DurableError {
    /// A deferred url that does not exist (never created, or cleaned up).
    #[error("not found: {key}")]
    NotFound {
        /// The unknown key.
        key: String,
    },

    /// Nobody settled the deferred within its TTL.
    #[error("timed out after {ttl_seconds}s waiting for {key}")]
    Timeout {
        /// Deferred url.
        key: String,
        /// Time waited.
        ttl_seconds: u64,
    },

    /// The deferred was settled negatively.
    #[error("{key} rejected: {reason}")]
    Rejected {
        /// Deferred url.
        key: String,
        /// Reason given by the rejecter.
        reason: String,
    },

    /// `respond` was called on an envelope that was not sent by `ask`.
    ///
    /// This is a caller bug rather than a runtime condition.
    #[error("envelope {sequence} has no reply_to")]
    MissingReplyTo {
        /// Sequence of the offending envelope.
        sequence: i64,
    },

    /// A message event whose body does not decode as an envelope of the
    /// requested type. Commit past it to move on.
    #[error("malformed envelope at sequence {sequence}: {detail}")]
    BadEnvelope {
        /// Sequence of the message event.
        sequence: i64,
        /// Decoder message.
        detail: String,
    },

    /// Caller passed an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A blocking store read was cancelled or panicked.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Storage failure, propagated unmodified.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for DurableError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

/// Convenience type alias for durable results.
pub type Result<T> = std::result::Result<T, DurableError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn timeout_display() {
        let err = DurableError::Timeout {
            key: "deferred:x".into(),
            ttl_seconds: 1,
        };
        assert_eq!(err.to_string(), "timed out after 1s waiting for deferred:x");
    }

    #[test]
    fn store_errors_are_transparent() {
        let err: DurableError = StoreError::InvalidArgument("agent must not be empty".into()).into();
        assert_eq!(err.to_string(), "invalid argument: agent must not be empty");
    }

    #[test]
    fn sqlite_errors_route_through_store() {
        let err: DurableError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_matches!(err, DurableError::Store(StoreError::Sqlite(_)));
    }
}
