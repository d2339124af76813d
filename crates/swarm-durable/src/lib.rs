//! # swarm-durable
//!
//! Coordination primitives persisted through the swarm event store:
//!
//! - **Cursors**: [`DurableCursor`], resumable consumption with per-item acks
//! - **Deferreds**: [`DeferredStore`], single-resolution futures with TTL
//! - **Mailboxes**: [`Mailbox`], per-agent FIFO queues over the event log
//! - **Ask**: [`AskClient`], request/reply composed from the two above
//!
//! [`Coordination`] wires all of them to one database.

#![deny(unsafe_code)]

pub mod ask;
pub mod coordination;
pub mod cursor;
pub mod deferred;
pub mod errors;
pub mod mailbox;

pub use ask::{AskClient, AskRequest};
pub use coordination::Coordination;
pub use cursor::{Ack, Consume, CursorFilter, Delivery, DurableCursor};
pub use deferred::{DeferredConfig, DeferredSnapshot, DeferredState, DeferredStore, PendingDeferred, Settlement};
pub use errors::{DurableError, Result};
pub use mailbox::{Envelope, Mailbox, Receive, SendOptions};
