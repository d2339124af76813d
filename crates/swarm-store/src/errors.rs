//! Error types for the store subsystem.
//!
//! [`StoreError`] is what the adapter and event store return. Higher layers
//! wrap it transparently so connectivity and serialization failures reach the
//! caller unmodified.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem error while preparing a database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table (or `query` for ad-hoc adapter reads).
        table: String,
        /// Column that failed to decode.
        column: String,
        /// Decoder message.
        detail: String,
    },

    /// Caller passed an unusable argument (empty key, unknown column).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Reject empty or whitespace-only identifiers.
pub fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
