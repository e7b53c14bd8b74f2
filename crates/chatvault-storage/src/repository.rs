//! Row repositories for the four archive tables.
//!
//! Each repository borrows a `rusqlite::Connection`. A `Transaction`
//! dereferences to one, so the persistence engine hands the same
//! transaction to every repository and all inserts land in one commit.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use chatvault_core::error::{Result, VaultError};
use chatvault_core::types::{ChatSource, MediaType};

use crate::model::{Chat, DatabaseId, Media, Message, User};

/// Reserved tenant partition. Always zero.
pub const DEFAULT_ACCOUNT_ID: i64 = 0;

/// Primary key of the canonical system user.
pub const SYSTEM_USER_ID: i64 = 0;

/// Stored name of the canonical system user.
pub const SYSTEM_USER_NAME: &str = "__system__";

/// Ids bound per `IN (...)` statement. SQLite caps bound parameters at
/// 32766 per statement.
const MAX_IDS_PER_QUERY: usize = 10_000;

// =============================================================================
// Rows
// =============================================================================

/// A row of `chats`. The id is ignored on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRow {
    pub chat_id: i64,
    pub account_id: i64,
    pub name: String,
    pub source: ChatSource,
}

impl ChatRow {
    pub fn from_chat(chat: &Chat) -> Self {
        Self {
            chat_id: chat.database_id().map(DatabaseId::value).unwrap_or_default(),
            account_id: DEFAULT_ACCOUNT_ID,
            name: chat.name().to_string(),
            source: chat.source(),
        }
    }
}

/// A row of `users`. The id is ignored on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user_id: i64,
    pub account_id: i64,
    pub name: String,
    pub is_system: bool,
}

impl UserRow {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.database_id().map(DatabaseId::value).unwrap_or_default(),
            account_id: DEFAULT_ACCOUNT_ID,
            name: user.name().to_string(),
            is_system: user.is_system(),
        }
    }
}

/// A row of `media`. The id is ignored on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRow {
    pub media_id: i64,
    pub account_id: i64,
    pub media_type: MediaType,
    pub media_size: i64,
    pub mime_type: String,
}

impl MediaRow {
    pub fn from_media(media: &Media) -> Self {
        Self {
            media_id: media.database_id().map(DatabaseId::value).unwrap_or_default(),
            account_id: DEFAULT_ACCOUNT_ID,
            media_type: media.media_type(),
            media_size: i64::try_from(media.size()).unwrap_or(i64::MAX),
            mime_type: media.mime_type().to_string(),
        }
    }

    pub fn size_bytes(&self) -> Result<u64> {
        u64::try_from(self.media_size).map_err(|_| {
            VaultError::Storage(format!(
                "Media {} has a negative size: {}",
                self.media_id, self.media_size
            ))
        })
    }
}

/// A row of `messages`. The id is ignored on insert.
///
/// `media_id` is `NULL` for messages without media.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub message_id: i64,
    pub account_id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub media_id: Option<i64>,
    pub timestamp: i64,
    pub text: String,
}

impl MessageRow {
    /// Build a row from a message whose relations are already resolved.
    pub fn from_message(
        message: &Message,
        chat_id: DatabaseId<Chat>,
        sender_id: DatabaseId<User>,
        media_id: Option<DatabaseId<Media>>,
    ) -> Self {
        Self {
            message_id: message.database_id().map(DatabaseId::value).unwrap_or_default(),
            account_id: DEFAULT_ACCOUNT_ID,
            chat_id: chat_id.value(),
            sender_id: sender_id.value(),
            media_id: media_id.map(DatabaseId::value),
            timestamp: message.timestamp().timestamp(),
            text: message.text().to_string(),
        }
    }

    pub fn timestamp_utc(&self) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0).ok_or_else(|| {
            VaultError::Storage(format!(
                "Message {} has an out-of-range timestamp: {}",
                self.message_id, self.timestamp
            ))
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// `?, ?, ?` for an `IN (...)` clause.
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> VaultError + '_ {
    move |e| VaultError::Storage(format!("{}: {}", context, e))
}

fn row_to_chat(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        chat_id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        source: ChatSource::from_i64(row.get::<_, Option<i64>>(3)?.unwrap_or_default()),
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        user_id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        is_system: row.get::<_, i64>(3)? != 0,
    })
}

fn row_to_media(row: &Row<'_>) -> rusqlite::Result<MediaRow> {
    Ok(MediaRow {
        media_id: row.get(0)?,
        account_id: row.get(1)?,
        media_type: MediaType::from_i64(row.get::<_, Option<i64>>(2)?.unwrap_or_default()),
        media_size: row.get(3)?,
        mime_type: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        message_id: row.get(0)?,
        account_id: row.get(1)?,
        chat_id: row.get(2)?,
        sender_id: row.get(3)?,
        media_id: row.get(4)?,
        timestamp: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
        text: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

/// Run `SELECT <columns> FROM <table> WHERE <key> IN (...)` ordered by key.
///
/// Ids are sorted, deduplicated and bound in chunks of
/// `MAX_IDS_PER_QUERY`, so the merged result stays in key order. An empty
/// id list returns immediately without preparing a statement: `IN ()` is
/// not valid SQL.
fn select_by_ids<T>(
    conn: &Connection,
    columns: &str,
    table: &str,
    key: &str,
    ids: &[i64],
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut result = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
            columns,
            table,
            key,
            placeholders(chunk.len()),
            key
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| VaultError::Storage(format!("Failed to query {}: {}", table, e)))?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), map)
            .map_err(|e| VaultError::Storage(format!("Failed to query {}: {}", table, e)))?;

        for row in rows {
            result.push(row.map_err(|e| VaultError::Storage(e.to_string()))?);
        }
    }
    Ok(result)
}

const CHAT_COLUMNS: &str = "chat_id, account_id, name, source";
const USER_COLUMNS: &str = "user_id, account_id, name, is_system";
const MEDIA_COLUMNS: &str = "media_id, account_id, type, media_size, mime_type";
const MESSAGE_COLUMNS: &str =
    "message_id, account_id, chat_id, sender_id, media_id, timestamp, text";

// =============================================================================
// ChatRepository
// =============================================================================

pub struct ChatRepository<'c> {
    conn: &'c Connection,
}

impl<'c> ChatRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn create_table(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS chats (
                    chat_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                    account_id  INTEGER NOT NULL DEFAULT 0,
                    name        TEXT,
                    source      INTEGER
                );",
            )
            .map_err(storage_err("Failed to create chats table"))
    }

    pub fn insert(&self, row: &ChatRow) -> Result<DatabaseId<Chat>> {
        self.conn
            .execute(
                "INSERT INTO chats (account_id, name, source) VALUES (?1, ?2, ?3)",
                params![row.account_id, row.name, row.source.as_i64()],
            )
            .map_err(storage_err("Failed to insert chat"))?;
        Ok(DatabaseId::new(self.conn.last_insert_rowid()))
    }

    pub fn get_by_id(&self, id: DatabaseId<Chat>) -> Result<ChatRow> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM chats WHERE chat_id = ?1", CHAT_COLUMNS),
                params![id.value()],
                row_to_chat,
            )
            .optional()
            .map_err(storage_err("Failed to query chat"))?
            .ok_or_else(|| VaultError::not_found("chat", id.value()))
    }

    pub fn get_by_ids(&self, ids: &[DatabaseId<Chat>]) -> Result<Vec<ChatRow>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.value()).collect();
        select_by_ids(self.conn, CHAT_COLUMNS, "chats", "chat_id", &ids, row_to_chat)
    }

    /// All chats, ordered by id.
    pub fn list(&self) -> Result<Vec<ChatRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM chats ORDER BY chat_id", CHAT_COLUMNS))
            .map_err(storage_err("Failed to list chats"))?;
        let rows = stmt
            .query_map([], row_to_chat)
            .map_err(storage_err("Failed to list chats"))?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row.map_err(|e| VaultError::Storage(e.to_string()))?);
        }
        Ok(chats)
    }
}

// =============================================================================
// UserRepository
// =============================================================================

pub struct UserRepository<'c> {
    conn: &'c Connection,
}

impl<'c> UserRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn create_table(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    user_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                    account_id  INTEGER NOT NULL DEFAULT 0,
                    name        TEXT,
                    is_system   INTEGER NOT NULL DEFAULT 0
                );",
            )
            .map_err(storage_err("Failed to create users table"))
    }

    /// Create the canonical system user if it does not exist yet.
    pub fn create_system_user(&self) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO users (user_id, account_id, name, is_system)
                 VALUES (?1, ?2, ?3, 1)",
                params![SYSTEM_USER_ID, DEFAULT_ACCOUNT_ID, SYSTEM_USER_NAME],
            )
            .map_err(storage_err("Failed to create system user"))?;
        Ok(())
    }

    /// Database id of the canonical system user.
    pub fn system_user_id(&self) -> Result<DatabaseId<User>> {
        self.conn
            .query_row(
                "SELECT user_id FROM users
                 WHERE is_system = 1 AND account_id = ?1
                 ORDER BY user_id LIMIT 1",
                params![DEFAULT_ACCOUNT_ID],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(storage_err("Failed to query system user"))?
            .map(DatabaseId::new)
            .ok_or_else(|| VaultError::not_found("system user", SYSTEM_USER_ID))
    }

    pub fn insert(&self, row: &UserRow) -> Result<DatabaseId<User>> {
        self.conn
            .execute(
                "INSERT INTO users (account_id, name, is_system) VALUES (?1, ?2, ?3)",
                params![row.account_id, row.name, row.is_system as i64],
            )
            .map_err(storage_err("Failed to insert user"))?;
        Ok(DatabaseId::new(self.conn.last_insert_rowid()))
    }

    pub fn get_by_id(&self, id: DatabaseId<User>) -> Result<UserRow> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE user_id = ?1", USER_COLUMNS),
                params![id.value()],
                row_to_user,
            )
            .optional()
            .map_err(storage_err("Failed to query user"))?
            .ok_or_else(|| VaultError::not_found("user", id.value()))
    }

    pub fn get_by_ids(&self, ids: &[DatabaseId<User>]) -> Result<Vec<UserRow>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.value()).collect();
        select_by_ids(self.conn, USER_COLUMNS, "users", "user_id", &ids, row_to_user)
    }

    /// All users, ordered by id.
    pub fn list(&self) -> Result<Vec<UserRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM users ORDER BY user_id", USER_COLUMNS))
            .map_err(storage_err("Failed to list users"))?;
        let rows = stmt
            .query_map([], row_to_user)
            .map_err(storage_err("Failed to list users"))?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row.map_err(|e| VaultError::Storage(e.to_string()))?);
        }
        Ok(users)
    }
}

// =============================================================================
// MediaRepository
// =============================================================================

pub struct MediaRepository<'c> {
    conn: &'c Connection,
}

impl<'c> MediaRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn create_table(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS media (
                    media_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                    account_id  INTEGER NOT NULL DEFAULT 0,
                    type        INTEGER,
                    media_size  INTEGER NOT NULL DEFAULT 0,
                    mime_type   TEXT
                );",
            )
            .map_err(storage_err("Failed to create media table"))
    }

    pub fn insert(&self, row: &MediaRow) -> Result<DatabaseId<Media>> {
        self.conn
            .execute(
                "INSERT INTO media (account_id, type, media_size, mime_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.account_id,
                    row.media_type.as_i64(),
                    row.media_size,
                    row.mime_type
                ],
            )
            .map_err(storage_err("Failed to insert media"))?;
        Ok(DatabaseId::new(self.conn.last_insert_rowid()))
    }

    pub fn get_by_id(&self, id: DatabaseId<Media>) -> Result<MediaRow> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM media WHERE media_id = ?1", MEDIA_COLUMNS),
                params![id.value()],
                row_to_media,
            )
            .optional()
            .map_err(storage_err("Failed to query media"))?
            .ok_or_else(|| VaultError::not_found("media", id.value()))
    }

    pub fn get_by_ids(&self, ids: &[DatabaseId<Media>]) -> Result<Vec<MediaRow>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.value()).collect();
        select_by_ids(self.conn, MEDIA_COLUMNS, "media", "media_id", &ids, row_to_media)
    }
}

// =============================================================================
// MessageRepository
// =============================================================================

pub struct MessageRepository<'c> {
    conn: &'c Connection,
}

impl<'c> MessageRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn create_table(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS messages (
                    message_id  INTEGER PRIMARY KEY AUTOINCREMENT,
                    account_id  INTEGER NOT NULL DEFAULT 0,
                    chat_id     INTEGER NOT NULL REFERENCES chats (chat_id),
                    sender_id   INTEGER NOT NULL REFERENCES users (user_id),
                    media_id    INTEGER REFERENCES media (media_id),
                    timestamp   INTEGER,
                    text        TEXT
                );",
            )
            .map_err(storage_err("Failed to create messages table"))
    }

    pub fn insert(&self, row: &MessageRow) -> Result<DatabaseId<Message>> {
        self.conn
            .execute(
                "INSERT INTO messages (account_id, chat_id, sender_id, media_id, timestamp, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.account_id,
                    row.chat_id,
                    row.sender_id,
                    row.media_id,
                    row.timestamp,
                    row.text
                ],
            )
            .map_err(storage_err("Failed to insert message"))?;
        Ok(DatabaseId::new(self.conn.last_insert_rowid()))
    }

    pub fn get_by_id(&self, id: DatabaseId<Message>) -> Result<MessageRow> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE message_id = ?1", MESSAGE_COLUMNS),
                params![id.value()],
                row_to_message,
            )
            .optional()
            .map_err(storage_err("Failed to query message"))?
            .ok_or_else(|| VaultError::not_found("message", id.value()))
    }

    pub fn get_by_ids(&self, ids: &[DatabaseId<Message>]) -> Result<Vec<MessageRow>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.value()).collect();
        select_by_ids(
            self.conn,
            MESSAGE_COLUMNS,
            "messages",
            "message_id",
            &ids,
            row_to_message,
        )
    }

    /// Messages of one chat in timeline order.
    pub fn get_by_chat_id(&self, chat_id: DatabaseId<Chat>) -> Result<Vec<MessageRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM messages WHERE chat_id = ?1
                 ORDER BY timestamp, message_id",
                MESSAGE_COLUMNS
            ))
            .map_err(storage_err("Failed to query messages"))?;
        let rows = stmt
            .query_map(params![chat_id.value()], row_to_message)
            .map_err(storage_err("Failed to query messages"))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(|e| VaultError::Storage(e.to_string()))?);
        }
        Ok(messages)
    }

    pub fn distinct_sender_ids_by_chat(
        &self,
        chat_id: DatabaseId<Chat>,
    ) -> Result<Vec<DatabaseId<User>>> {
        self.distinct_ids(
            "SELECT DISTINCT sender_id FROM messages WHERE chat_id = ?1 ORDER BY sender_id",
            chat_id,
        )
    }

    /// Media ids referenced by the chat's messages. Messages without media
    /// are skipped.
    pub fn distinct_media_ids_by_chat(
        &self,
        chat_id: DatabaseId<Chat>,
    ) -> Result<Vec<DatabaseId<Media>>> {
        self.distinct_ids(
            "SELECT DISTINCT media_id FROM messages
             WHERE chat_id = ?1 AND media_id IS NOT NULL
             ORDER BY media_id",
            chat_id,
        )
    }

    fn distinct_ids<K>(&self, sql: &str, chat_id: DatabaseId<Chat>) -> Result<Vec<DatabaseId<K>>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(storage_err("Failed to query referenced ids"))?;
        let rows = stmt
            .query_map(params![chat_id.value()], |row| row.get::<_, i64>(0))
            .map_err(storage_err("Failed to query referenced ids"))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(DatabaseId::new(
                row.map_err(|e| VaultError::Storage(e.to_string()))?,
            ));
        }
        Ok(ids)
    }
}
