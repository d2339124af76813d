//! `SQLite` backend.
//!
//! - **[`connection`]**: `r2d2` pools (file or memory) with pragmas applied to
//!   every connection.
//! - **[`migrations`]**: version-tracked schema, embedded at compile time.
//! - **[`database`]**: the adapter facade (`query`, `exec`, `execute`,
//!   `with_conn`, `write_tx`).
//! - **[`registry`]**: one shared pool per location with explicit close.

pub mod connection;
pub mod database;
pub mod migrations;
pub mod registry;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, verify_pragmas};
pub use database::{Backend, Database, QueryRow};
pub use migrations::{current_version, latest_version, run_migrations};
pub use registry::DatabaseRegistry;
