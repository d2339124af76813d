//! Durable deferreds: single-resolution futures addressed by url.
//!
//! A deferred starts `pending` and moves to `resolved` or `rejected` exactly
//! once. The transition is one conditional `UPDATE ... WHERE state =
//! 'pending'` inside a write transaction, so of several racing settlers
//! exactly one changes the row. The others get
//! [`Settlement::AlreadySettled`] and the row is untouched.
//!
//! Settled values are never consumed: every [`DeferredStore::wait`] on the
//! same url observes the same outcome. Waiting polls the row with capped
//! exponential backoff and gives up after the caller's TTL, independently of
//! whether [`DeferredStore::cleanup_expired`] ever runs.

use std::time::Duration;

use rusqlite::{OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarm_core::{DeferredUrl, PollBackoff, clock};
use swarm_settings::DeferredSettings;
use swarm_store::{Database, StoreError};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::errors::{DurableError, Result};

/// Lifecycle state of a deferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeferredState {
    /// Awaiting settlement.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with an error.
    Rejected,
}

impl DeferredState {
    /// Stored column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "rejected" => Ok(Self::Rejected),
            other => Err(StoreError::CorruptRow {
                table: "deferreds".into(),
                column: "state".into(),
                detail: format!("unknown state {other:?}"),
            }
            .into()),
        }
    }
}

/// Outcome of a `resolve` or `reject` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// This call settled the deferred.
    Applied,
    /// Someone else settled it first; nothing was changed.
    AlreadySettled {
        /// The state the winner left.
        state: DeferredState,
    },
}

impl Settlement {
    /// Whether this call won.
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Timing knobs for [`DeferredStore`].
#[derive(Clone, Debug)]
pub struct DeferredConfig {
    /// TTL for [`DeferredStore::create_default`].
    pub default_ttl_secs: u64,
    /// First poll delay.
    pub poll_initial: Duration,
    /// Poll delay cap.
    pub poll_max: Duration,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self::from(&DeferredSettings::default())
    }
}

impl From<&DeferredSettings> for DeferredConfig {
    fn from(settings: &DeferredSettings) -> Self {
        Self {
            default_ttl_secs: settings.default_ttl_secs,
            poll_initial: Duration::from_millis(settings.poll_initial_ms),
            poll_max: Duration::from_millis(settings.poll_max_ms),
        }
    }
}

/// A freshly created deferred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDeferred {
    /// Address to hand to whoever will settle it.
    pub url: DeferredUrl,
    /// TTL it was created with.
    pub ttl_seconds: u64,
    /// Expiry, epoch milliseconds.
    pub expires_at: i64,
}

impl PendingDeferred {
    /// Wait for settlement for this deferred's own TTL.
    pub async fn wait<T: DeserializeOwned>(&self, store: &DeferredStore) -> Result<T> {
        store.wait(&self.url, self.ttl_seconds).await
    }
}

/// Point-in-time view of a deferred row.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredSnapshot {
    /// Address.
    pub url: DeferredUrl,
    /// Current state.
    pub state: DeferredState,
    /// Resolved value.
    pub value: Option<Value>,
    /// Rejection reason.
    pub error: Option<String>,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// Expiry time (RFC 3339).
    pub expires_at: String,
    /// Settlement time (RFC 3339), if settled.
    pub settled_at: Option<String>,
}

/// Creates, settles and awaits deferreds.
#[derive(Clone, Debug)]
pub struct DeferredStore {
    db: Database,
    config: DeferredConfig,
}

impl DeferredStore {
    /// Wrap an open database.
    pub fn new(db: Database, config: DeferredConfig) -> Self {
        Self { db, config }
    }

    /// Timing configuration.
    pub fn config(&self) -> &DeferredConfig {
        &self.config
    }

    /// Create a pending deferred expiring `ttl_seconds` from now.
    #[instrument(skip(self))]
    pub fn create(&self, ttl_seconds: u64) -> Result<PendingDeferred> {
        if ttl_seconds == 0 {
            return Err(DurableError::InvalidArgument("ttl_seconds must be > 0".into()));
        }
        let url = DeferredUrl::new();
        let now = clock::now_millis();
        let expires_at = clock::expiry_after(now, ttl_seconds);

        let _ = self.db.execute(
            "INSERT INTO deferreds (url, state, created_at, expires_at) VALUES (?1, 'pending', ?2, ?3)",
            &[&url.as_str(), &now, &expires_at],
        )?;
        debug!(%url, expires_at, "deferred created");

        Ok(PendingDeferred {
            url,
            ttl_seconds,
            expires_at,
        })
    }

    /// Create with the configured default TTL.
    pub fn create_default(&self) -> Result<PendingDeferred> {
        self.create(self.config.default_ttl_secs)
    }

    /// Settle `url` with `value`.
    pub fn resolve<V: Serialize + ?Sized>(&self, url: &str, value: &V) -> Result<Settlement> {
        let json = serde_json::to_string(value)?;
        self.settle(url, DeferredState::Resolved, Some(json), None)
    }

    /// Settle `url` negatively.
    pub fn reject(&self, url: &str, reason: &str) -> Result<Settlement> {
        self.settle(url, DeferredState::Rejected, None, Some(reason))
    }

    #[instrument(skip(self, value, error), fields(state = state.as_str()))]
    fn settle(
        &self,
        url: &str,
        state: DeferredState,
        value: Option<String>,
        error: Option<&str>,
    ) -> Result<Settlement> {
        let settlement = self.db.write_tx(|conn| {
            let changed = conn.execute(
                "UPDATE deferreds SET state = ?2, value = ?3, error = ?4, settled_at = ?5 \
                 WHERE url = ?1 AND state = 'pending'",
                params![url, state.as_str(), value, error, clock::now_millis()],
            )?;
            if changed == 1 {
                return Ok(Settlement::Applied);
            }
            let current: Option<String> = conn
                .query_row(
                    "SELECT state FROM deferreds WHERE url = ?1",
                    params![url],
                    |row| row.get(0),
                )
                .optional()?;
            match current {
                Some(raw) => Ok(Settlement::AlreadySettled {
                    state: DeferredState::parse(&raw)?,
                }),
                None => Err(DurableError::NotFound { key: url.to_string() }),
            }
        })?;

        if let Settlement::AlreadySettled { state: winner } = settlement {
            warn!(winner = winner.as_str(), "deferred already settled, ignoring");
        }
        Ok(settlement)
    }

    /// Current row for `url`.
    pub fn get(&self, url: &str) -> Result<DeferredSnapshot> {
        let raw = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT url, state, value, error, created_at, expires_at, settled_at \
                 FROM deferreds WHERE url = ?1",
                params![url],
                raw_row,
            )
            .optional()
            .map_err(DurableError::from)
        })?;
        raw.ok_or_else(|| DurableError::NotFound { key: url.to_string() })?
            .decode()
    }

    /// Wait until `url` is settled or `ttl_seconds` elapse.
    ///
    /// A resolved value is decoded as `T`. A rejection surfaces as
    /// [`DurableError::Rejected`]; running out of time as
    /// [`DurableError::Timeout`]. Already-settled deferreds return at once.
    /// A TTL too large to represent as a deadline waits without one.
    ///
    /// Each poll reads the row on the blocking pool so a slow connection
    /// checkout never stalls the async worker.
    #[instrument(skip(self))]
    pub async fn wait<T: DeserializeOwned>(&self, url: &str, ttl_seconds: u64) -> Result<T> {
        let deadline = Instant::now().checked_add(Duration::from_secs(ttl_seconds));
        let mut backoff = PollBackoff::new(
            duration_millis(self.config.poll_initial),
            duration_millis(self.config.poll_max),
        );

        loop {
            let snapshot = self.get_blocking(url).await?;
            match snapshot.state {
                DeferredState::Resolved => {
                    let value = snapshot.value.unwrap_or(Value::Null);
                    return Ok(serde_json::from_value(value)?);
                }
                DeferredState::Rejected => {
                    return Err(DurableError::Rejected {
                        key: url.to_string(),
                        reason: snapshot.error.unwrap_or_default(),
                    });
                }
                DeferredState::Pending => {}
            }

            let mut delay = backoff.next_delay();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    warn!("deferred wait timed out");
                    return Err(DurableError::Timeout {
                        key: url.to_string(),
                        ttl_seconds,
                    });
                }
                delay = delay.min(deadline - now);
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn get_blocking(&self, url: &str) -> Result<DeferredSnapshot> {
        let store = self.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || store.get(&url)).await?
    }

    /// Delete rows past their expiry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let removed = self.db.execute(
            "DELETE FROM deferreds WHERE expires_at < ?1",
            &[&clock::now_millis()],
        )?;
        if removed > 0 {
            debug!(removed, "expired deferreds removed");
        }
        Ok(removed)
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

struct RawDeferred {
    url: String,
    state: String,
    value: Option<String>,
    error: Option<String>,
    created_at: i64,
    expires_at: i64,
    settled_at: Option<i64>,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawDeferred> {
    Ok(RawDeferred {
        url: row.get(0)?,
        state: row.get(1)?,
        value: row.get(2)?,
        error: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
        settled_at: row.get(6)?,
    })
}

impl RawDeferred {
    fn decode(self) -> Result<DeferredSnapshot> {
        let value = self
            .value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::CorruptRow {
                table: "deferreds".into(),
                column: "value".into(),
                detail: e.to_string(),
            })?;
        Ok(DeferredSnapshot {
            url: DeferredUrl::from(self.url),
            state: DeferredState::parse(&self.state)?,
            value,
            error: self.error,
            created_at: clock::millis_to_rfc3339(self.created_at),
            expires_at: clock::millis_to_rfc3339(self.expires_at),
            settled_at: self.settled_at.map(clock::millis_to_rfc3339),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
