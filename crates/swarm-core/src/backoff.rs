//! Poll backoff calculation.
//!
//! Pollers (deferred waits, caller-built receive loops) start fast and slow
//! down geometrically up to a cap. Jitter spreads many waiters on one store so
//! they do not poll in lockstep.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default first poll delay in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 10;
/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 200;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (random * 2 - 1) * jitter)`
///
/// `random` should be a value in `[0.0, 1.0)`; `0.5` yields no jitter.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(1.0) as u64
}

/// Backoff schedule for a polling loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollBackoff {
    /// First delay in ms.
    pub initial_delay_ms: u64,
    /// Delay cap in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
    #[serde(skip)]
    attempt: u32,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

impl PollBackoff {
    /// Schedule starting at `initial_delay_ms` and capped at `max_delay_ms`.
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms: initial_delay_ms.max(1),
            max_delay_ms: max_delay_ms.max(initial_delay_ms).max(1),
            jitter_factor: DEFAULT_JITTER_FACTOR,
            attempt: 0,
        }
    }

    /// Disable jitter (deterministic schedule).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Delay before the next poll; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let random = if self.jitter_factor > 0.0 {
            rand::random::<f64>()
        } else {
            0.5
        };
        let ms = calculate_backoff_delay(
            self.attempt,
            self.initial_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        );
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms)
    }

    /// Restart the schedule from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
