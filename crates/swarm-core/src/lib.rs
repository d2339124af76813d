//! # swarm-core
//!
//! Foundation types shared by every swarm crate:
//!
//! - **Branded IDs**: [`DeferredUrl`] and [`ThreadId`] newtypes over `String`
//! - **Clock**: millisecond epoch and RFC 3339 helpers used for TTL math
//! - **Backoff**: capped exponential delay used by pollers
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod backoff;
pub mod clock;
pub mod ids;
pub mod logging;

pub use backoff::{PollBackoff, calculate_backoff_delay};
pub use ids::{DeferredUrl, ThreadId};
