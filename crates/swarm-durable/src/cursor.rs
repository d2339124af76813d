//! Durable cursors: named, persisted read positions over an event stream.
//!
//! A cursor is identified by `(stream, checkpoint)`, where the stream is a
//! project key of the [`EventStore`]. The checkpoint row is created at
//! position 0 the first time it is opened.
//!
//! [`DurableCursor::consume`] returns a pull-based iterator. Each call to
//! `next` hands out one buffered event, fetching another batch only when the
//! buffer is empty. When a batch comes back short the iterator ends; it never
//! waits for new events. Dropping it early reads nothing further.
//!
//! Each [`Delivery`] carries an [`Ack`] that commits exactly that event's
//! sequence, so callers can acknowledge per item or only the last of a batch.
//! Commits are monotonic: an older ack arriving late never rewinds the
//! cursor. Use [`DurableCursor::seek`] to move backwards on purpose.

use std::collections::VecDeque;

use rusqlite::{OptionalExtension, params};
use swarm_core::clock;
use swarm_store::errors::require_non_empty;
use swarm_store::{EventRecord, EventStore, ReadOptions};
use tracing::{debug, instrument};

use crate::errors::{DurableError, Result};

const COMMIT_SQL: &str = "\
    INSERT INTO cursors (stream, checkpoint, position, updated_at) VALUES (?1, ?2, ?3, ?4) \
    ON CONFLICT(stream, checkpoint) DO UPDATE SET \
        position = MAX(position, excluded.position), \
        updated_at = excluded.updated_at \
    RETURNING position";

const SEEK_SQL: &str = "\
    INSERT INTO cursors (stream, checkpoint, position, updated_at) VALUES (?1, ?2, ?3, ?4) \
    ON CONFLICT(stream, checkpoint) DO UPDATE SET \
        position = excluded.position, \
        updated_at = excluded.updated_at";

/// Restricts which events a cursor sees.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CursorFilter {
    /// Only these event types.
    pub types: Option<Vec<String>>,
    /// Only events addressed to this recipient.
    pub recipient: Option<String>,
}

/// A named read position over one stream.
#[derive(Clone, Debug)]
pub struct DurableCursor {
    events: EventStore,
    stream: String,
    checkpoint: String,
    filter: CursorFilter,
}

impl DurableCursor {
    /// Open `(stream, checkpoint)`, creating it at position 0 if new.
    pub fn open(events: EventStore, stream: &str, checkpoint: &str) -> Result<Self> {
        Self::open_filtered(events, stream, checkpoint, CursorFilter::default())
    }

    /// Open with a fixed filter applied to every `consume`.
    #[instrument(skip(events, filter))]
    pub fn open_filtered(
        events: EventStore,
        stream: &str,
        checkpoint: &str,
        filter: CursorFilter,
    ) -> Result<Self> {
        require_non_empty("stream", stream)?;
        require_non_empty("checkpoint", checkpoint)?;

        let _ = events.database().execute(
            "INSERT OR IGNORE INTO cursors (stream, checkpoint, position, updated_at) VALUES (?1, ?2, 0, ?3)",
            &[&stream, &checkpoint, &clock::now_rfc3339()],
        )?;

        Ok(Self {
            events,
            stream: stream.to_string(),
            checkpoint: checkpoint.to_string(),
            filter,
        })
    }

    /// Stream (project key) this cursor reads.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Checkpoint name.
    pub fn checkpoint(&self) -> &str {
        &self.checkpoint
    }

    /// Filter fixed at open.
    pub fn filter(&self) -> &CursorFilter {
        &self.filter
    }

    /// Last committed sequence (0 before any commit).
    pub fn position(&self) -> Result<i64> {
        let position = self.events.database().with_conn(|conn| {
            conn.query_row(
                "SELECT position FROM cursors WHERE stream = ?1 AND checkpoint = ?2",
                params![self.stream, self.checkpoint],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(DurableError::from)
        })?;
        Ok(position.unwrap_or(0))
    }

    /// Advance to `sequence` if it is ahead of the stored position.
    ///
    /// Returns the position now stored.
    pub fn commit(&self, sequence: i64) -> Result<i64> {
        let stored = self.events.database().with_conn(|conn| {
            conn.query_row(
                COMMIT_SQL,
                params![self.stream, self.checkpoint, sequence, clock::now_rfc3339()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(DurableError::from)
        })?;
        debug!(checkpoint = %self.checkpoint, sequence, stored, "cursor committed");
        Ok(stored)
    }

    /// Overwrite the stored position, forwards or backwards.
    pub fn seek(&self, position: i64) -> Result<()> {
        if position < 0 {
            return Err(DurableError::InvalidArgument(format!(
                "cursor position must be >= 0, got {position}"
            )));
        }
        let _ = self.events.database().execute(
            SEEK_SQL,
            &[&self.stream, &self.checkpoint, &position, &clock::now_rfc3339()],
        )?;
        debug!(checkpoint = %self.checkpoint, position, "cursor seek");
        Ok(())
    }

    /// Drain events currently available past the stored position.
    ///
    /// `types` narrows the cursor's own type filter for this call only.
    pub fn consume(&self, batch_size: usize, types: Option<&[&str]>) -> Result<Consume> {
        if batch_size == 0 {
            return Err(DurableError::InvalidArgument("batch_size must be > 0".into()));
        }
        let types = narrow_types(self.filter.types.as_deref(), types);
        Ok(Consume {
            cursor: self.clone(),
            batch_size,
            types,
            read_from: None,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }
}

fn narrow_types(fixed: Option<&[String]>, requested: Option<&[&str]>) -> Option<Vec<String>> {
    match (fixed, requested) {
        (None, None) => None,
        (Some(fixed), None) => Some(fixed.to_vec()),
        (None, Some(requested)) => Some(requested.iter().map(|t| (*t).to_string()).collect()),
        (Some(fixed), Some(requested)) => Some(
            fixed
                .iter()
                .filter(|t| requested.contains(&t.as_str()))
                .cloned()
                .collect(),
        ),
    }
}

/// Lazy, finite iterator returned by [`DurableCursor::consume`].
#[derive(Debug)]
pub struct Consume {
    cursor: DurableCursor,
    batch_size: usize,
    types: Option<Vec<String>>,
    read_from: Option<i64>,
    buffer: VecDeque<EventRecord>,
    exhausted: bool,
}

impl Consume {
    fn fill(&mut self) -> Result<()> {
        let after = match self.read_from {
            Some(position) => position,
            None => self.cursor.position()?,
        };
        let options = ReadOptions {
            after_sequence: after,
            limit: self.batch_size,
            types: self.types.clone(),
            recipient: self.cursor.filter.recipient.clone(),
        };
        let batch = self.cursor.events.read(&self.cursor.stream, &options)?;

        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        self.read_from = Some(batch.last().map_or(after, |e| e.sequence));
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for Consume {
    type Item = Result<Delivery>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                let ack = Ack {
                    cursor: self.cursor.clone(),
                    sequence: event.sequence,
                };
                return Some(Ok(Delivery { event, ack }));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}

/// One consumed event and its acknowledgment handle.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// The event.
    pub event: EventRecord,
    /// Commits this event's sequence.
    pub ack: Ack,
}

impl Delivery {
    /// Shorthand for `self.ack.commit()`.
    pub fn commit(&self) -> Result<i64> {
        self.ack.commit()
    }
}

/// Acknowledgment for one delivered event.
#[derive(Clone, Debug)]
pub struct Ack {
    cursor: DurableCursor,
    sequence: i64,
}

impl Ack {
    /// Sequence this ack commits.
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Persist the cursor at this sequence (monotonic).
    pub fn commit(&self) -> Result<i64> {
        self.cursor.commit(self.sequence)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
