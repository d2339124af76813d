//! The database adapter.
//!
//! [`Database`] is a cheap-to-clone handle over a connection pool. Every
//! primitive in the kernel takes one in its constructor and performs all of
//! its I/O through it. SQL text is always static; caller data travels as
//! bound parameters only.
//!
//! Connections are checked out per call and returned before the call
//! completes. Nothing here holds a connection while acquiring a second one,
//! which keeps the single-connection memory backend deadlock free.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::{FromSql, Value, ValueRef};
use rusqlite::{Connection, ToSql, TransactionBehavior};
use tracing::{debug, instrument};

use super::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use super::migrations;
use crate::errors::{Result, StoreError};

/// Where a [`Database`] keeps its data.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Durable single file (WAL journal).
    File(PathBuf),
    /// Ephemeral in-memory store, alive while any handle exists.
    Memory(String),
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Memory(name) => write!(f, "memory:{name}"),
        }
    }
}

/// Pooled, migrated database handle.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
    backend: Backend,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.backend)
            .field("max_size", &self.pool.max_size())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if needed) a durable database file and migrate it.
    ///
    /// Missing parent directories are created.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &ConnectionConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let pool = connection::new_file(path, config)?;
        Self::migrated(pool, Backend::File(path.to_path_buf()))
    }

    /// Open a fresh, anonymous in-memory database.
    pub fn in_memory(config: &ConnectionConfig) -> Result<Self> {
        Self::in_memory_named(uuid::Uuid::now_v7().to_string(), config)
    }

    /// Open a fresh in-memory database labelled `name`.
    ///
    /// The label is informational; two calls with the same name still
    /// produce two independent stores. Use
    /// [`DatabaseRegistry`](super::DatabaseRegistry) to share one.
    pub fn in_memory_named(name: impl Into<String>, config: &ConnectionConfig) -> Result<Self> {
        let pool = connection::new_in_memory(config)?;
        Self::migrated(pool, Backend::Memory(name.into()))
    }

    fn migrated(pool: ConnectionPool, backend: Backend) -> Result<Self> {
        {
            let conn = pool.get()?;
            let applied = migrations::run_migrations(&conn)?;
            debug!(%backend, applied, "database ready");
        }
        Ok(Self { pool, backend })
    }

    /// Storage location of this handle.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Check out a pooled connection.
    pub fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Run a parameterized query and materialize every row.
    pub fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<QueryRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(row.get::<_, Value>(idx)?);
            }
            out.push(QueryRow {
                columns: Arc::clone(&columns),
                values,
            });
        }
        Ok(out)
    }

    /// Execute one or more statements without parameters (DDL, pragmas).
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    /// Execute a single parameterized statement, returning rows changed.
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
        Ok(self.conn()?.execute(sql, params)?)
    }

    /// Run `f` with a pooled connection in autocommit mode.
    pub fn with_conn<T, E>(&self, f: impl FnOnce(&Connection) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.conn()?;
        f(&conn)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so every read inside `f` sees the
    /// state its writes will commit against. Returning `Err` rolls back.
    pub fn write_tx<T, E>(&self, f: impl FnOnce(&Connection) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let out = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }
}

/// One materialized result row, addressable by column name.
#[derive(Clone, Debug)]
pub struct QueryRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl QueryRow {
    /// Column names in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw value of `column`, if present.
    pub fn value(&self, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    /// Decode `column` as `T`.
    pub fn get<T: FromSql>(&self, column: &str) -> Result<T> {
        let value = self
            .value(column)
            .ok_or_else(|| StoreError::InvalidArgument(format!("no column named {column}")))?;
        T::column_result(ValueRef::from(value)).map_err(|e| StoreError::CorruptRow {
            table: "query".into(),
            column: column.into(),
            detail: e.to_string(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn memory() -> Database {
        Database::in_memory(&ConnectionConfig::default()).unwrap()
    }

    fn table_count(db: &Database) -> i64 {
        db.query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table'", &[])
            .unwrap()[0]
            .get("n")
            .unwrap()
    }

    #[test]
    fn query_binds_parameters() {
        let db = memory();
        db.exec("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER)").unwrap();
        let changed = db
            .execute("INSERT INTO kv (k, v) VALUES (?1, ?2)", &[&"a", &1_i64])
            .unwrap();
        assert_eq!(changed, 1);

        let rows = db.query("SELECT k, v FROM kv WHERE k = ?1", &[&"a"]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>("k").unwrap(), "a");
        assert_eq!(rows[0].get::<i64>("v").unwrap(), 1);
        assert_eq!(rows[0].columns(), ["k".to_string(), "v".to_string()]);
    }

    #[test]
    fn hostile_parameter_is_stored_literally() {
        let db = memory();
        let before = table_count(&db);
        let hostile = "x'); DROP TABLE events; --";
        let _ = db
            .execute(
                "INSERT INTO cursors (stream, checkpoint, position, updated_at) VALUES (?1, ?2, 0, 'now')",
                &[&hostile, &hostile],
            )
            .unwrap();
        let rows = db
            .query("SELECT stream FROM cursors WHERE checkpoint = ?1", &[&hostile])
            .unwrap();
        assert_eq!(rows[0].get::<String>("stream").unwrap(), hostile);
        assert_eq!(table_count(&db), before);
    }

    #[test]
    fn unknown_column_is_invalid_argument() {
        let db = memory();
        let rows = db.query("SELECT 1 AS one", &[]).unwrap();
        assert_matches!(rows[0].get::<i64>("two"), Err(StoreError::InvalidArgument(_)));
        assert_matches!(rows[0].get::<String>("one"), Err(StoreError::CorruptRow { .. }));
    }

    #[test]
    fn write_tx_rolls_back_on_error() {
        let db = memory();
        db.exec("CREATE TABLE t (x INTEGER)").unwrap();
        let result: std::result::Result<(), StoreError> = db.write_tx(|conn| {
            let _ = conn.execute("INSERT INTO t VALUES (1)", [])?;
            Err(StoreError::InvalidArgument("abort".into()))
        });
        assert!(result.is_err());
        let rows = db.query("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert_eq!(rows[0].get::<i64>("n").unwrap(), 0);
    }

    #[test]
    fn memory_databases_are_independent() {
        let a = memory();
        let b = memory();
        a.exec("CREATE TABLE only_a (x INTEGER)").unwrap();
        assert!(b.exec("INSERT INTO only_a VALUES (1)").is_err());
        assert_ne!(a.backend(), b.backend());
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("swarm.db");
        {
            let db = Database::open(&path, &ConnectionConfig::default()).unwrap();
            let _ = db
                .execute(
                    "INSERT INTO cursors (stream, checkpoint, position, updated_at) VALUES ('s', 'c', 9, 'now')",
                    &[],
                )
                .unwrap();
        }
        let db = Database::open(&path, &ConnectionConfig::default()).unwrap();
        let rows = db.query("SELECT position FROM cursors", &[]).unwrap();
        assert_eq!(rows[0].get::<i64>("position").unwrap(), 9);
        assert_eq!(db.backend(), &Backend::File(path));
    }

    #[test]
    fn backend_display() {
        assert_eq!(Backend::Memory("t".into()).to_string(), "memory:t");
        assert_eq!(Backend::File("/a/b.db".into()).to_string(), "file:/a/b.db");
    }
}
