//! Error types for file reservations.
//!
//! Conflicts are not errors: they come back in
//! [`ReserveOutcome::conflicts`](crate::ReserveOutcome::conflicts).

use swarm_store::StoreError;
use thiserror::Error;

/// Errors from the reservation registry.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// A path pattern that is not a valid glob.
    #[error("invalid path pattern {pattern:?}: {detail}")]
    InvalidPattern {
        /// Pattern as given.
        pattern: String,
        /// Parser message.
        detail: String,
    },

    /// Caller passed an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage failure, propagated unmodified.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for ReservationError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;
