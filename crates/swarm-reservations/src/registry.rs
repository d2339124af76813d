//! The file reservation registry.
//!
//! A reservation is active from `granted_at` until `expires_at` unless it is
//! released earlier. Expired and released rows never take part in conflict
//! checks or listings; [`FileReservations::purge_expired`] deletes them.
//!
//! `reserve` reads the active set and writes its grants inside one
//! `BEGIN IMMEDIATE` transaction, so two processes asking for the same path
//! at the same moment are serialized and the second sees the first's grant.
//!
//! Rules for each requested path:
//!
//! - Reservations held by the requesting agent never conflict with it.
//!   Asking again for a pattern it already holds refreshes that row.
//! - An exclusive request conflicts with every overlapping active
//!   reservation held by someone else, shared or exclusive.
//! - A shared request is always granted.
//!
//! There is no queueing. Conflicts are returned to the caller, who decides
//! whether and when to retry.

use rusqlite::{Connection, Row, params};
use serde::Serialize;
use swarm_core::clock;
use swarm_settings::ReservationSettings;
use swarm_store::Database;
use swarm_store::errors::require_non_empty;
use tracing::{debug, info, instrument, warn};

use crate::errors::{ReservationError, Result};
use crate::patterns::{normalize_path, patterns_overlap, validate_pattern};

const SELECT_COLUMNS: &str =
    "id, project_key, path_pattern, holder, exclusive, granted_at, ttl_seconds, expires_at, reason";

/// A request for one or more paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReserveRequest {
    /// Requesting agent.
    pub agent: String,
    /// Project scope.
    pub project_key: String,
    /// Literal paths or globs.
    pub paths: Vec<String>,
    /// Exclusive (write) or shared (read) intent.
    pub exclusive: bool,
    /// Lifetime; the registry default when `None`.
    pub ttl_seconds: Option<u64>,
    /// Free-form note shown to conflicting agents.
    pub reason: Option<String>,
}

impl ReserveRequest {
    /// Exclusive request with the default TTL and no reason.
    pub fn exclusive<I, S>(agent: &str, project_key: &str, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent: agent.to_string(),
            project_key: project_key.to_string(),
            paths: paths.into_iter().map(Into::into).collect(),
            exclusive: true,
            ttl_seconds: None,
            reason: None,
        }
    }

    /// Shared request with the default TTL and no reason.
    pub fn shared<I, S>(agent: &str, project_key: &str, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclusive: false,
            ..Self::exclusive(agent, project_key, paths)
        }
    }

    /// Set the TTL.
    #[must_use]
    pub fn ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Set the reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// An active reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Row id.
    pub id: i64,
    /// Project scope.
    pub project_key: String,
    /// Normalized pattern.
    pub path_pattern: String,
    /// Holding agent.
    pub holder: String,
    /// Exclusive or shared.
    pub exclusive: bool,
    /// Grant time, RFC 3339.
    pub granted_at: String,
    /// Lifetime in seconds.
    pub ttl_seconds: u64,
    /// Expiry time, RFC 3339.
    pub expires_at: String,
    /// Note from the holder.
    pub reason: Option<String>,
}

/// A requested path that could not be granted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationConflict {
    /// Requested path (normalized).
    pub path: String,
    /// Overlapping pattern already held.
    pub pattern: String,
    /// Agent holding it.
    pub holder: String,
    /// Whether that reservation is exclusive.
    pub exclusive: bool,
    /// When it lapses, RFC 3339.
    pub expires_at: String,
    /// The holder's note.
    pub reason: Option<String>,
}

/// Result of [`FileReservations::reserve`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReserveOutcome {
    /// Paths now held by the requester.
    pub granted: Vec<Reservation>,
    /// One entry per (requested path, blocking reservation) pair.
    pub conflicts: Vec<ReservationConflict>,
}

impl ReserveOutcome {
    /// Whether every requested path was granted.
    pub fn is_clear(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// What to release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseRequest {
    /// Holding agent.
    pub agent: String,
    /// Project scope.
    pub project_key: String,
    /// Specific patterns, or everything the agent holds when `None`.
    pub paths: Option<Vec<String>>,
}

impl ReleaseRequest {
    /// Release everything `agent` holds in `project_key`.
    pub fn all(agent: &str, project_key: &str) -> Self {
        Self {
            agent: agent.to_string(),
            project_key: project_key.to_string(),
            paths: None,
        }
    }

    /// Release specific patterns.
    pub fn paths<I, S>(agent: &str, project_key: &str, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: Some(paths.into_iter().map(Into::into).collect()),
            ..Self::all(agent, project_key)
        }
    }
}

/// Path locks stored in the shared database.
#[derive(Clone, Debug)]
pub struct FileReservations {
    db: Database,
    default_ttl_secs: u64,
}

impl FileReservations {
    /// Wrap an open database.
    pub fn new(db: Database, settings: &ReservationSettings) -> Self {
        Self {
            db,
            default_ttl_secs: settings.default_ttl_secs,
        }
    }

    /// Grant what can be granted and report the rest.
    #[instrument(skip(self, request), fields(agent = %request.agent, exclusive = request.exclusive))]
    pub fn reserve(&self, request: &ReserveRequest) -> Result<ReserveOutcome> {
        let paths = self.validate(request)?;
        let ttl_seconds = request.ttl_seconds.unwrap_or(self.default_ttl_secs);

        let outcome = self.db.write_tx(|conn| {
            let now = clock::now_millis();
            let mut active = load_active(conn, &request.project_key, now)?;
            let mut outcome = ReserveOutcome::default();

            for path in &paths {
                let conflicts = conflicts_for(&active, &request.agent, path, request.exclusive);
                if !conflicts.is_empty() {
                    outcome.conflicts.extend(conflicts);
                    continue;
                }
                let granted = upsert(conn, request, path, ttl_seconds, now)?;
                active.retain(|r| r.id != granted.id);
                active.push(granted.clone());
                outcome.granted.push(granted);
            }
            Ok::<_, ReservationError>(outcome)
        })?;

        if outcome.is_clear() {
            info!(granted = outcome.granted.len(), "reservation granted");
        } else {
            warn!(
                granted = outcome.granted.len(),
                conflicts = outcome.conflicts.len(),
                "reservation conflicts"
            );
        }
        Ok(outcome)
    }

    /// What [`FileReservations::reserve`] would report as conflicts, without
    /// granting anything.
    pub fn check_conflicts(&self, request: &ReserveRequest) -> Result<Vec<ReservationConflict>> {
        let paths = self.validate(request)?;
        self.db.with_conn(|conn| {
            let active = load_active(conn, &request.project_key, clock::now_millis())?;
            Ok(paths
                .iter()
                .flat_map(|path| conflicts_for(&active, &request.agent, path, request.exclusive))
                .collect())
        })
    }

    /// Release the agent's matching active reservations. Returns how many.
    ///
    /// Releasing something not held is a no-op, not an error.
    #[instrument(skip(self, request), fields(agent = %request.agent))]
    pub fn release(&self, request: &ReleaseRequest) -> Result<usize> {
        require_non_empty("agent", &request.agent)?;
        require_non_empty("project_key", &request.project_key)?;

        let released = self.db.write_tx(|conn| {
            let now = clock::now_millis();
            match &request.paths {
                None => Ok::<_, ReservationError>(conn.execute(
                    "UPDATE reservations SET released_at = ?3 \
                     WHERE project_key = ?1 AND holder = ?2 \
                       AND released_at IS NULL AND expires_at >= ?3",
                    params![request.project_key, request.agent, now],
                )?),
                Some(paths) => {
                    let mut total = 0;
                    for path in paths {
                        total += conn.execute(
                            "UPDATE reservations SET released_at = ?4 \
                             WHERE project_key = ?1 AND holder = ?2 AND path_pattern = ?3 \
                               AND released_at IS NULL AND expires_at >= ?4",
                            params![request.project_key, request.agent, normalize_path(path), now],
                        )?;
                    }
                    Ok(total)
                }
            }
        })?;

        if released > 0 {
            info!(released, "reservations released");
        }
        Ok(released)
    }

    /// Every active reservation in `project_key`.
    pub fn active(&self, project_key: &str) -> Result<Vec<Reservation>> {
        self.db
            .with_conn(|conn| load_active(conn, project_key, clock::now_millis()))
    }

    /// Active reservations held by `agent`.
    pub fn held_by(&self, project_key: &str, agent: &str) -> Result<Vec<Reservation>> {
        Ok(self
            .active(project_key)?
            .into_iter()
            .filter(|r| r.holder == agent)
            .collect())
    }

    /// Delete expired and released rows. Returns how many.
    pub fn purge_expired(&self) -> Result<usize> {
        let purged = self.db.execute(
            "DELETE FROM reservations WHERE released_at IS NOT NULL OR expires_at < ?1",
            &[&clock::now_millis()],
        )?;
        if purged > 0 {
            debug!(purged, "reservations purged");
        }
        Ok(purged)
    }

    fn validate(&self, request: &ReserveRequest) -> Result<Vec<String>> {
        require_non_empty("agent", &request.agent)?;
        require_non_empty("project_key", &request.project_key)?;
        if request.ttl_seconds == Some(0) {
            return Err(ReservationError::InvalidArgument("ttl_seconds must be > 0".into()));
        }
        let mut normalized: Vec<String> = Vec::with_capacity(request.paths.len());
        for path in &request.paths {
            validate_pattern(path)?;
            let path = normalize_path(path);
            if !normalized.contains(&path) {
                normalized.push(path);
            }
        }
        Ok(normalized)
    }
}

fn conflicts_for(
    active: &[Reservation],
    agent: &str,
    path: &str,
    exclusive: bool,
) -> Vec<ReservationConflict> {
    if !exclusive {
        return Vec::new();
    }
    active
        .iter()
        .filter(|held| held.holder != agent && patterns_overlap(path, &held.path_pattern))
        .map(|held| ReservationConflict {
            path: path.to_string(),
            pattern: held.path_pattern.clone(),
            holder: held.holder.clone(),
            exclusive: held.exclusive,
            expires_at: held.expires_at.clone(),
            reason: held.reason.clone(),
        })
        .collect()
}

fn load_active(conn: &Connection, project_key: &str, now: i64) -> Result<Vec<Reservation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM reservations \
         WHERE project_key = ?1 AND released_at IS NULL AND expires_at >= ?2 \
         ORDER BY id ASC"
    ))?;
    let rows = stmt.query_map(params![project_key, now], map_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn upsert(
    conn: &Connection,
    request: &ReserveRequest,
    path: &str,
    ttl_seconds: u64,
    now: i64,
) -> Result<Reservation> {
    let expires_at = clock::expiry_after(now, ttl_seconds);
    let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);

    let refreshed = conn.execute(
        "UPDATE reservations SET exclusive = ?4, granted_at = ?5, ttl_seconds = ?6, expires_at = ?7, reason = ?8 \
         WHERE project_key = ?1 AND holder = ?2 AND path_pattern = ?3 \
           AND released_at IS NULL AND expires_at >= ?5",
        params![
            request.project_key,
            request.agent,
            path,
            request.exclusive,
            now,
            ttl,
            expires_at,
            request.reason
        ],
    )?;
    if refreshed == 0 {
        let _ = conn.execute(
            "INSERT INTO reservations \
             (project_key, path_pattern, holder, exclusive, granted_at, ttl_seconds, expires_at, reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.project_key,
                path,
                request.agent,
                request.exclusive,
                now,
                ttl,
                expires_at,
                request.reason
            ],
        )?;
    }

    let row = conn.query_row(
        &format!(
            "SELECT {SELECT_COLUMNS} FROM reservations \
             WHERE project_key = ?1 AND holder = ?2 AND path_pattern = ?3 AND released_at IS NULL \
             ORDER BY id DESC LIMIT 1"
        ),
        params![request.project_key, request.agent, path],
        map_row,
    )?;
    Ok(row)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Reservation> {
    let granted_at: i64 = row.get(5)?;
    let ttl_seconds: i64 = row.get(6)?;
    let expires_at: i64 = row.get(7)?;
    Ok(Reservation {
        id: row.get(0)?,
        project_key: row.get(1)?,
        path_pattern: row.get(2)?,
        holder: row.get(3)?,
        exclusive: row.get(4)?,
        granted_at: clock::millis_to_rfc3339(granted_at),
        ttl_seconds: u64::try_from(ttl_seconds).unwrap_or(0),
        expires_at: clock::millis_to_rfc3339(expires_at),
        reason: row.get(8)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
