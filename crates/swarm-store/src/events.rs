//! Append-only event log.
//!
//! Each project key owns an independent, dense sequence starting at 1.
//! Sequence assignment and insert happen in one statement under a write
//! transaction, so concurrent appenders (threads or processes sharing the
//! file) can never observe or claim the same number. A unique index on
//! `(project_key, sequence)` backs this up at the storage layer.
//!
//! Failures from the adapter are returned as-is; nothing here retries.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarm_core::clock;
use tracing::{debug, instrument};

use crate::errors::{Result, StoreError, require_non_empty};
use crate::sqlite::Database;

/// Event type used for mailbox messages. Their payload `to` field is copied
/// into the indexed `recipient` column.
pub const MESSAGE_EVENT_TYPE: &str = "mailbox.message";

/// Default `limit` for [`ReadOptions`].
pub const DEFAULT_READ_LIMIT: usize = 1000;

const APPEND_SQL: &str = "\
    INSERT INTO events (project_key, sequence, type, timestamp, payload, recipient) \
    SELECT ?1, COALESCE(MAX(sequence), 0) + 1, ?2, ?3, ?4, ?5 \
    FROM events WHERE project_key = ?1 \
    RETURNING sequence";

const SELECT_COLUMNS: &str = "sequence, project_key, type, timestamp, payload, recipient";

/// An event to append.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    /// Dotted type name (`task.created`, `mailbox.message`).
    pub event_type: String,
    /// Arbitrary JSON body.
    pub payload: Value,
}

impl NewEvent {
    /// Build an event.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// A persisted event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Position within the project, starting at 1.
    pub sequence: i64,
    /// Scope the sequence belongs to.
    pub project_key: String,
    /// Dotted type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Append time, RFC 3339 with milliseconds.
    pub timestamp: String,
    /// JSON body.
    pub payload: Value,
    /// Addressee, for message events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// Filters for [`EventStore::read`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    /// Only events with `sequence > after_sequence`.
    pub after_sequence: i64,
    /// Maximum events returned.
    pub limit: usize,
    /// Restrict to these types. `Some(vec![])` matches nothing.
    pub types: Option<Vec<String>>,
    /// Restrict to events addressed to this recipient.
    pub recipient: Option<String>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            after_sequence: 0,
            limit: DEFAULT_READ_LIMIT,
            types: None,
            recipient: None,
        }
    }
}

impl ReadOptions {
    /// Events after `sequence`.
    #[must_use]
    pub fn after(mut self, sequence: i64) -> Self {
        self.after_sequence = sequence;
        self
    }

    /// Cap the result size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Restrict to the given types.
    #[must_use]
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to one recipient.
    #[must_use]
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }
}

/// The event log. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventStore {
    db: Database,
}

impl EventStore {
    /// Wrap an open database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Underlying adapter.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Append `event` to `project_key`, returning its sequence.
    ///
    /// The row is committed before this returns.
    pub fn append(&self, project_key: &str, event: &NewEvent) -> Result<i64> {
        self.append_record(project_key, event).map(|r| r.sequence)
    }

    /// Append and return the stored record.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub fn append_record(&self, project_key: &str, event: &NewEvent) -> Result<EventRecord> {
        require_non_empty("project_key", project_key)?;
        require_non_empty("event type", &event.event_type)?;

        let payload = serde_json::to_string(&event.payload)?;
        let recipient = extract_recipient(&event.event_type, &event.payload);
        let timestamp = clock::now_rfc3339();

        let sequence: i64 = self.db.write_tx(|conn| {
            conn.query_row(
                APPEND_SQL,
                params![project_key, event.event_type, timestamp, payload, recipient],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })?;
        debug!(sequence, "event appended");

        Ok(EventRecord {
            sequence,
            project_key: project_key.to_string(),
            event_type: event.event_type.clone(),
            timestamp,
            payload: event.payload.clone(),
            recipient,
        })
    }

    /// Read events in ascending sequence order.
    pub fn read(&self, project_key: &str, options: &ReadOptions) -> Result<Vec<EventRecord>> {
        if options.limit == 0 || options.types.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE project_key = ?1 AND sequence > ?2"
        );
        let mut binds: Vec<SqlValue> = vec![
            SqlValue::Text(project_key.to_string()),
            SqlValue::Integer(options.after_sequence),
        ];

        if let Some(types) = &options.types {
            let start = binds.len() + 1;
            let placeholders: Vec<String> = (start..start + types.len())
                .map(|i| format!("?{i}"))
                .collect();
            sql.push_str(&format!(" AND type IN ({})", placeholders.join(", ")));
            binds.extend(types.iter().cloned().map(SqlValue::Text));
        }
        if let Some(recipient) = &options.recipient {
            binds.push(SqlValue::Text(recipient.clone()));
            sql.push_str(&format!(" AND recipient = ?{}", binds.len()));
        }

        binds.push(SqlValue::Integer(i64::try_from(options.limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" ORDER BY sequence ASC LIMIT ?{}", binds.len()));

        self.db.with_conn(|conn| query_events(conn, &sql, binds))
    }

    /// Highest sequence in `project_key`, or 0 when empty.
    pub fn latest_sequence(&self, project_key: &str) -> Result<i64> {
        self.db.with_conn(|conn| {
            let seq: Option<i64> = conn
                .query_row(
                    "SELECT MAX(sequence) FROM events WHERE project_key = ?1",
                    params![project_key],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            Ok(seq.unwrap_or(0))
        })
    }

    /// Number of events in `project_key`.
    pub fn count(&self, project_key: &str) -> Result<i64> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM events WHERE project_key = ?1",
                params![project_key],
                |row| row.get(0),
            )?)
        })
    }
}

fn extract_recipient(event_type: &str, payload: &Value) -> Option<String> {
    if event_type != MESSAGE_EVENT_TYPE {
        return None;
    }
    payload.get("to").and_then(Value::as_str).map(str::to_owned)
}

fn query_events(conn: &Connection, sql: &str, binds: Vec<SqlValue>) -> Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(binds), raw_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.decode()?);
    }
    Ok(out)
}

struct RawEvent {
    sequence: i64,
    project_key: String,
    event_type: String,
    timestamp: String,
    payload: String,
    recipient: Option<String>,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        sequence: row.get(0)?,
        project_key: row.get(1)?,
        event_type: row.get(2)?,
        timestamp: row.get(3)?,
        payload: row.get(4)?,
        recipient: row.get(5)?,
    })
}

impl RawEvent {
    fn decode(self) -> Result<EventRecord> {
        let payload = serde_json::from_str(&self.payload).map_err(|e| StoreError::CorruptRow {
            table: "events".into(),
            column: "payload".into(),
            detail: format!("sequence {}: {e}", self.sequence),
        })?;
        Ok(EventRecord {
            sequence: self.sequence,
            project_key: self.project_key,
            event_type: self.event_type,
            timestamp: self.timestamp,
            payload,
            recipient: self.recipient,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::ConnectionConfig;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn store() -> EventStore {
        EventStore::new(Database::in_memory(&ConnectionConfig::default()).unwrap())
    }

    fn ev(t: &str) -> NewEvent {
        NewEvent::new(t, json!({"n": t}))
    }

    #[test]
    fn sequences_start_at_one_per_project() {
        let store = store();
        assert_eq!(store.append("p1", &ev("a")).unwrap(), 1);
        assert_eq!(store.append("p1", &ev("b")).unwrap(), 2);
        assert_eq!(store.append("p2", &ev("a")).unwrap(), 1);
        assert_eq!(store.latest_sequence("p1").unwrap(), 2);
        assert_eq!(store.latest_sequence("empty").unwrap(), 0);
        assert_eq!(store.count("p1").unwrap(), 2);
    }

    #[test]
    fn append_record_echoes_stored_row() {
        let store = store();
        let record = store
            .append_record("p", &NewEvent::new("task.created", json!({"id": 7})))
            .unwrap();
        let read = store.read("p", &ReadOptions::default()).unwrap();
        assert_eq!(read, vec![record]);
    }

    #[test]
    fn read_is_ascending_after_sequence_and_capped() {
        let store = store();
        for t in ["a", "b", "c", "d", "e"] {
            let _ = store.append("p", &ev(t)).unwrap();
        }
        let seqs: Vec<i64> = store
            .read("p", &ReadOptions::default().after(2).limit(2))
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn read_filters_by_type() {
        let store = store();
        for t in ["a", "b", "a", "c"] {
            let _ = store.append("p", &ev(t)).unwrap();
        }
        let got = store
            .read("p", &ReadOptions::default().types(["a", "c"]))
            .unwrap();
        let seqs: Vec<i64> = got.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 3, 4]);

        let none = store
            .read("p", &ReadOptions::default().types(Vec::<String>::new()))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn message_recipient_is_indexed() {
        let store = store();
        let _ = store
            .append("p", &NewEvent::new(MESSAGE_EVENT_TYPE, json!({"to": "bob"})))
            .unwrap();
        let _ = store
            .append("p", &NewEvent::new(MESSAGE_EVENT_TYPE, json!({"to": "alice"})))
            .unwrap();
        // Non-message events never carry a recipient.
        let _ = store.append("p", &NewEvent::new("other", json!({"to": "bob"}))).unwrap();

        let bob = store.read("p", &ReadOptions::default().recipient("bob")).unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].sequence, 1);
        assert_eq!(bob[0].recipient.as_deref(), Some("bob"));
    }

    #[test]
    fn empty_keys_rejected() {
        let store = store();
        assert_matches!(store.append("", &ev("a")), Err(StoreError::InvalidArgument(_)));
        assert_matches!(store.append("p", &ev(" ")), Err(StoreError::InvalidArgument(_)));
    }

    #[test]
    fn zero_limit_reads_nothing() {
        let store = store();
        let _ = store.append("p", &ev("a")).unwrap();
        assert!(store.read("p", &ReadOptions::default().limit(0)).unwrap().is_empty());
    }

    #[test]
    fn corrupt_payload_surfaces_as_corrupt_row() {
        let store = store();
        let _ = store
            .database()
            .execute(
                "INSERT INTO events (project_key, sequence, type, timestamp, payload) VALUES ('p', 1, 't', 'now', 'not json')",
                &[],
            )
            .unwrap();
        assert_matches!(
            store.read("p", &ReadOptions::default()),
            Err(StoreError::CorruptRow { column, .. }) if column == "payload"
        );
    }

    #[test]
    fn record_serializes_type_field() {
        let record = EventRecord {
            sequence: 1,
            project_key: "p".into(),
            event_type: "x.y".into(),
            timestamp: "2025-01-01T00:00:00.000Z".into(),
            payload: json!({}),
            recipient: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "x.y");
        assert_eq!(json["projectKey"], "p");
        assert!(json.get("recipient").is_none());
    }
}
