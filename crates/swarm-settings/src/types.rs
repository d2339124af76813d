//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial JSON
//! is accepted and missing fields keep their compiled default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Largest accepted connection pool.
pub const MAX_POOL_SIZE: u32 = 64;

/// Root settings type.
///
/// ```json
/// {
///   "storage": { "databasePath": "/var/lib/swarm/swarm.db", "poolSize": 4 },
///   "deferred": { "pollMaxMs": 100 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwarmSettings {
    /// Relational store location and pool tuning.
    pub storage: StorageSettings,
    /// Deferred TTL and polling.
    pub deferred: DeferredSettings,
    /// Mailbox consumption.
    pub mailbox: MailboxSettings,
    /// File reservations.
    pub reservations: ReservationSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl SwarmSettings {
    /// Reject values that would make the kernel misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.storage.pool_size == 0 || self.storage.pool_size > MAX_POOL_SIZE {
            return Err(SettingsError::InvalidValue(format!(
                "storage.poolSize must be 1..={MAX_POOL_SIZE}, got {}",
                self.storage.pool_size
            )));
        }
        if self.storage.database_path.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "storage.databasePath must not be empty".into(),
            ));
        }
        if self.deferred.poll_initial_ms == 0 || self.deferred.poll_max_ms < self.deferred.poll_initial_ms {
            return Err(SettingsError::InvalidValue(format!(
                "deferred polling needs 0 < pollInitialMs <= pollMaxMs, got {} / {}",
                self.deferred.poll_initial_ms, self.deferred.poll_max_ms
            )));
        }
        if self.mailbox.batch_size == 0 {
            return Err(SettingsError::InvalidValue("mailbox.batchSize must be > 0".into()));
        }
        Ok(())
    }
}

/// Relational store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Path to the single-file database.
    pub database_path: String,
    /// Maximum pooled connections (file backend only; memory uses one).
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Page cache size in KiB.
    pub cache_size_kib: i64,
    /// How long to wait for a pooled connection.
    pub connection_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path().to_string_lossy().into_owned(),
            pool_size: 8,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
            connection_timeout_ms: 5_000,
        }
    }
}

fn default_database_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".swarm").join("swarm.db")
}

/// Durable deferred settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeferredSettings {
    /// TTL used when callers do not pass one.
    pub default_ttl_secs: u64,
    /// First poll delay while awaiting.
    pub poll_initial_ms: u64,
    /// Poll delay cap while awaiting.
    pub poll_max_ms: u64,
}

impl Default for DeferredSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 60,
            poll_initial_ms: 10,
            poll_max_ms: 200,
        }
    }
}

/// Mailbox settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailboxSettings {
    /// Events fetched per store round-trip during `receive`.
    pub batch_size: u32,
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// File reservation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReservationSettings {
    /// TTL used when callers do not pass one.
    pub default_ttl_secs: u64,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive (`warn`, `swarm_store=debug`, ...).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
