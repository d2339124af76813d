//! Shared database handles keyed by location.
//!
//! Opening the same file twice would give two pools competing for one WAL;
//! the registry hands out clones of a single [`Database`] per [`Backend`]
//! instead. It is an ordinary value owned by the host, not global state.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::connection::ConnectionConfig;
use super::database::{Backend, Database};
use crate::errors::Result;

/// One open [`Database`] per location, with explicit teardown.
#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    config: ConnectionConfig,
    open: Mutex<HashMap<Backend, Database>>,
}

impl DatabaseRegistry {
    /// Create an empty registry; every pool it opens uses `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Open `path`, or return the handle already open for it.
    ///
    /// Relative paths are resolved against the current directory so two
    /// spellings of one file share a handle.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<Database> {
        let abs = std::path::absolute(path.as_ref())?;
        let key = Backend::File(abs.clone());
        let mut open = self.open.lock();
        if let Some(db) = open.get(&key) {
            return Ok(db.clone());
        }
        let db = Database::open(&abs, &self.config)?;
        info!(backend = %key, "opened database");
        let _ = open.insert(key, db.clone());
        Ok(db)
    }

    /// Open the in-memory store called `name`, or return the existing one.
    pub fn open_memory(&self, name: &str) -> Result<Database> {
        let key = Backend::Memory(name.to_string());
        let mut open = self.open.lock();
        if let Some(db) = open.get(&key) {
            return Ok(db.clone());
        }
        let db = Database::in_memory_named(name, &self.config)?;
        debug!(backend = %key, "opened database");
        let _ = open.insert(key, db.clone());
        Ok(db)
    }

    /// Handle for `backend`, if open.
    pub fn get(&self, backend: &Backend) -> Option<Database> {
        self.open.lock().get(backend).cloned()
    }

    /// Forget `backend`. Returns whether it was open.
    ///
    /// The pool closes once the last outstanding clone is dropped; a memory
    /// store's contents are gone at that point.
    pub fn close(&self, backend: &Backend) -> bool {
        let removed = self.open.lock().remove(backend).is_some();
        if removed {
            info!(%backend, "closed database");
        }
        removed
    }

    /// Forget every handle. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let drained = self.open.lock().drain().count();
        if drained > 0 {
            info!(count = drained, "closed all databases");
        }
        drained
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    /// Whether nothing is open.
    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_memory_name_shares_state() {
        let registry = DatabaseRegistry::default();
        let a = registry.open_memory("shared").unwrap();
        let b = registry.open_memory("shared").unwrap();
        a.exec("CREATE TABLE marker (x INTEGER)").unwrap();
        b.exec("INSERT INTO marker VALUES (1)").unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_path_shares_a_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.db");
        let registry = DatabaseRegistry::default();
        let _a = registry.open_file(&path).unwrap();
        let _b = registry.open_file(path.clone()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&Backend::File(path)).is_some());
    }

    #[test]
    fn close_forgets_and_reopen_is_fresh() {
        let registry = DatabaseRegistry::default();
        let db = registry.open_memory("scratch").unwrap();
        db.exec("CREATE TABLE marker (x INTEGER)").unwrap();
        drop(db);

        let key = Backend::Memory("scratch".into());
        assert!(registry.close(&key));
        assert!(!registry.close(&key));

        let fresh = registry.open_memory("scratch").unwrap();
        assert!(fresh.exec("INSERT INTO marker VALUES (1)").is_err());
    }

    #[test]
    fn close_all_counts() {
        let registry = DatabaseRegistry::default();
        let _ = registry.open_memory("a").unwrap();
        let _ = registry.open_memory("b").unwrap();
        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.close_all(), 0);
    }
}
