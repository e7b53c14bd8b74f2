//! Database schema migrations.
//!
//! Version 1 creates the chats, users, media and messages tables through
//! their repositories and seeds the canonical system user.

use rusqlite::Connection;
use tracing::info;

use chatvault_core::error::{Result, VaultError};

use crate::repository::{ChatRepository, MediaRepository, MessageRepository, UserRepository};

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| VaultError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| VaultError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: archive tables and the system user.
fn apply_v1(conn: &Connection) -> Result<()> {
    ChatRepository::new(conn).create_table()?;
    UserRepository::new(conn).create_table()?;
    MediaRepository::new(conn).create_table()?;
    MessageRepository::new(conn).create_table()?;
    UserRepository::new(conn).create_system_user()?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages (chat_id, timestamp);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');",
    )
    .map_err(|e| VaultError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        // Running again should be idempotent.
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_archive_tables_exist() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        for table in ["chats", "users", "media", "messages"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_single_system_user_after_rerun() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE is_system = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_messages_chat_index() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_messages_chat'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
