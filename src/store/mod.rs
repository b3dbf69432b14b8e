//! SQLite-backed memory store.
//!
//! One [`Store`] handle owns the database connection and is shared by every
//! front-end in the process. All public operations are synchronous and
//! complete (or fail) before returning; SQLite's WAL mode and busy timeout
//! are the only inter-call synchronization the store relies on.

mod metrics;
mod read;
mod rows;
mod schema;
mod snapshot;
mod write;

pub use read::SearchFilter;
pub use rows::OBSERVATION_COLUMNS;
pub use write::{PassiveCaptureRequest, PASSIVE_SESSION_ID, PASSIVE_TYPE};

use crate::config::EngramConfig;
use crate::{Error, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Handle to the engram database.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access. While this serializes
/// database operations, SQLite's WAL mode and `busy_timeout` pragma mitigate
/// contention:
///
/// - **WAL mode**: allows concurrent readers with a single writer
/// - **`busy_timeout`**: waits up to 5 seconds for locks instead of failing
/// - **NORMAL synchronous**: balances durability with performance
pub struct Store {
    /// Connection to the SQLite database.
    ///
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Resolved configuration, shared by all operations.
    config: EngramConfig,
    /// Path to the database file (None for in-memory).
    db_path: Option<PathBuf>,
}

impl Store {
    /// Opens (creating if needed) the database under the configured data
    /// directory and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created, or
    /// if schema initialization or the legacy migration fails.
    pub fn open(config: &EngramConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| Error::storage("create_data_dir", e))?;
        let db_path = config.db_path();
        let conn =
            Connection::open(&db_path).map_err(|e| Error::storage("open_database", e))?;

        let store = Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Opens an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with(EngramConfig::default())
    }

    /// Opens an in-memory database with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub fn in_memory_with(config: EngramConfig) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::storage("open_in_memory", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            config,
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Returns the configuration the store was opened with.
    #[must_use]
    pub const fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// Configures pragmas and runs the schema manager.
    fn initialize(&self) -> Result<()> {
        let conn = self.lock();
        configure_connection(&conn)?;
        schema::initialize(&conn)
    }

    /// Acquires the connection mutex with poison recovery.
    ///
    /// If the mutex is poisoned by a panic in a previous critical section,
    /// the inner connection is recovered and a warning is logged; the
    /// connection state itself is still valid.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("store mutex was poisoned, recovering");
                metrics::record_poison_recovery();
                poisoned.into_inner()
            },
        }
    }

    /// Runs `body` inside a `BEGIN IMMEDIATE` transaction, committing on
    /// success and rolling back on error.
    fn with_transaction<T>(
        conn: &Connection,
        operation: &'static str,
        body: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::storage(operation, format!("begin transaction: {e}")))?;

        let result = body(conn);

        if result.is_ok() {
            conn.execute_batch("COMMIT")
                .map_err(|e| Error::storage(operation, format!("commit: {e}")))?;
        } else {
            let _ = conn.execute_batch("ROLLBACK");
        }
        result
    }
}

/// Configures a SQLite connection for performance and concurrency.
///
/// Applies WAL journal mode, NORMAL synchronous, a 5 second busy timeout,
/// and enables foreign keys.
///
/// # Errors
///
/// Returns [`Error::Storage`] if the foreign-key pragma cannot be applied.
pub(crate) fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row ("wal"), which execute() would reject
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::storage("configure_connection", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_open() {
        let store = Store::in_memory().unwrap();
        assert!(store.db_path().is_none());
        assert_eq!(store.config().content_max_bytes, 2_000);
    }

    #[test]
    fn test_open_on_disk_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngramConfig::default().with_data_dir(dir.path().join("nested/data"));
        let store = Store::open(&config).unwrap();
        assert!(store.db_path().unwrap().exists());
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngramConfig::default().with_data_dir(dir.path());
        drop(Store::open(&config).unwrap());
        // A second open must tolerate the existing schema and triggers.
        let store = Store::open(&config).unwrap();
        assert!(store.stats().unwrap().total_observations == 0);
    }

    #[test]
    fn test_configure_connection_pragmas() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);

        let foreign_keys: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);

        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 1);
    }
}
