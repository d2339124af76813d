//! # swarm-reservations
//!
//! Advisory, TTL-bounded path locks for agents editing a shared tree.
//!
//! - **Patterns**: [`patterns_overlap`] decides whether two literal paths or
//!   globs could cover a common file, biased toward reporting overlap
//! - **Registry**: [`FileReservations`] grants or refuses requests atomically
//!   and returns conflicts as data
//!
//! The registry shares the database with the other primitives but does not
//! touch the event log.

#![deny(unsafe_code)]

pub mod errors;
pub mod patterns;
pub mod registry;

pub use errors::{ReservationError, Result};
pub use patterns::{is_glob, normalize_path, patterns_overlap, validate_pattern};
pub use registry::{
    FileReservations, ReleaseRequest, Reservation, ReservationConflict, ReserveOutcome, ReserveRequest,
};
