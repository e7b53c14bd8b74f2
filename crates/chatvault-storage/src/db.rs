//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex. Every commit goes through
//! that lock, so there is at most one writer per `Database`.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use chatvault_core::error::{Result, VaultError};

use crate::migrations;

/// SQLite database wrapper with WAL mode and migrations applied.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| VaultError::Storage(format!("Failed to open database: {}", e)))?;
        configure(&conn)?;

        info!("Database opened at {}", path.display());
        Self::migrated(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VaultError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        configure(&conn)?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VaultError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Like [`Database::with_conn`], with mutable access for opening a
    /// transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| VaultError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
    .map_err(|e| VaultError::Storage(format!("Failed to set pragmas: {}", e)))
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .map_err(|e| VaultError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count(&db, "chats"), 0);
        assert_eq!(count(&db, "users"), 1);
    }

    #[test]
    fn test_file_database_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vault.db");
        let db = Database::open(&path).unwrap();

        assert_eq!(count(&db, "messages"), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        {
            let db = Database::open(&path).unwrap();
            db.with_conn(|conn| {
                conn.execute("INSERT INTO chats (account_id, name, source) VALUES (0, 'x', 1)", [])
                    .map_err(|e| VaultError::Storage(e.to_string()))?;
                Ok(())
            })
            .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(count(&db, "chats"), 1);
        assert_eq!(count(&db, "users"), 1);
    }

    #[test]
    fn test_wal_mode_enabled() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| VaultError::Storage(e.to_string()))?;
            // In-memory databases may report "memory" instead of "wal".
            assert!(
                mode == "wal" || mode == "memory",
                "Expected wal or memory, got: {}",
                mode
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::in_memory().unwrap();
        let enabled: i64 = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                    .map_err(|e| VaultError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
