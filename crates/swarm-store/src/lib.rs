//! # swarm-store
//!
//! The single I/O boundary of the swarm coordination kernel.
//!
//! - **Database adapter**: [`Database`] wraps an `r2d2` pool of `rusqlite`
//!   connections with two interchangeable backends, a durable single file
//!   (WAL) and an ephemeral in-memory store. All SQL is parameterized.
//! - **Registry**: [`DatabaseRegistry`] shares one pool per location and
//!   offers explicit teardown.
//! - **Migrations**: version-tracked schema for events, cursors, deferreds
//!   and reservations.
//! - **Event store**: [`EventStore`], the append-only, per-project,
//!   sequence-ordered log every durable primitive is built on.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod sqlite;

pub use errors::{Result, StoreError};
pub use events::{DEFAULT_READ_LIMIT, EventRecord, EventStore, MESSAGE_EVENT_TYPE, NewEvent, ReadOptions};
pub use sqlite::{Backend, ConnectionConfig, Database, DatabaseRegistry, QueryRow};
