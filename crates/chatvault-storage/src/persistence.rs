//! Persistence engine: commits working sets and loads them back.
//!
//! A save runs the four persist steps inside one SQLite transaction.
//! Queued media actions run only after the transaction has committed; on
//! rollback they are discarded.
//!
//! Database ids are patched into the working set as each insert succeeds.
//! If a later step fails, the store rolls back but entities persisted
//! earlier in the same save keep their (now dangling) database ids.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info};

use chatvault_core::error::{Result, VaultError};
use chatvault_core::types::media_extension;

use crate::context::WorkingSet;
use crate::db::Database;
use crate::media_actions::{ActionReport, MediaActionQueue};
use crate::model::{Chat, DatabaseId, Media, Message, Relation, RuntimeId, User};
use crate::repository::{ChatRepository, MediaRepository, MessageRepository, UserRepository};

/// Rows inserted by one save, plus the media action outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub chats: usize,
    pub users: usize,
    pub media: usize,
    pub messages: usize,
    pub media_actions: ActionReport,
}

impl SaveReport {
    pub fn inserted_rows(&self) -> usize {
        self.chats + self.users + self.media + self.messages
    }
}

/// A stored chat as shown in listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEntry {
    pub database_id: DatabaseId<Chat>,
    pub name: String,
}

/// The archive store: a database plus its managed media directory.
#[derive(Debug)]
pub struct ChatStorage {
    db: Database,
    media_dir: PathBuf,
}

impl ChatStorage {
    /// Open (or create) the store at `db_path`.
    ///
    /// The media directory is created lazily by the first media action.
    pub fn open(db_path: &Path, media_dir: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self {
            db,
            media_dir: media_dir.to_path_buf(),
        })
    }

    /// In-memory store (for testing).
    pub fn in_memory(media_dir: &Path) -> Result<Self> {
        Ok(Self {
            db: Database::in_memory()?,
            media_dir: media_dir.to_path_buf(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Managed file of a persisted media item.
    pub fn media_path(&self, media: &Media) -> Option<PathBuf> {
        media.database_id().map(|id| {
            self.media_dir
                .join(format!("{}.{}", id.value(), media_extension(media.mime_type())))
        })
    }

    /// Commit `working_set` as one unit and run the queued media actions.
    ///
    /// Relative media sources are resolved against `import_root`.
    pub fn save(&self, working_set: &mut WorkingSet, import_root: &Path) -> Result<SaveReport> {
        let mut queue = MediaActionQueue::new();
        let summary = working_set.summary();
        debug!(
            chat = working_set.chat().name(),
            users = summary.users,
            messages = summary.messages,
            media = summary.media,
            "Beginning save"
        );

        let outcome = self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| VaultError::Storage(format!("Failed to begin transaction: {}", e)))?;

            let mut report = SaveReport::default();
            let persisted = (|| -> Result<()> {
                report.chats = working_set.persist_chat(&tx)?;
                debug!(inserted = report.chats, "Persisted chat");
                report.users = working_set.persist_users(&tx)?;
                debug!(inserted = report.users, "Persisted users");
                report.media = working_set.persist_media(&tx, &mut queue)?;
                debug!(inserted = report.media, queued = queue.len(), "Persisted media");
                report.messages = working_set.persist_messages(&tx)?;
                debug!(inserted = report.messages, "Persisted messages");
                Ok(())
            })();

            match persisted {
                Ok(()) => {
                    tx.commit().map_err(|e| {
                        VaultError::Storage(format!("Failed to commit transaction: {}", e))
                    })?;
                    Ok(report)
                }
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback() {
                        error!(error = %rollback_err, "Rollback failed");
                    }
                    Err(e)
                }
            }
        });

        let mut report = match outcome {
            Ok(report) => report,
            Err(e) => {
                queue.clear();
                error!(error = %e, "Save rolled back");
                return Err(e);
            }
        };

        report.media_actions = queue.execute(import_root, &self.media_dir);
        info!(
            chat_id = ?working_set.chat().database_id(),
            rows = report.inserted_rows(),
            media_ok = report.media_actions.succeeded,
            media_failed = report.media_actions.failed,
            "Save committed"
        );
        Ok(report)
    }

    /// Rebuild the working set of a stored chat.
    ///
    /// Users and media get fresh runtime ids from `RuntimeId::ROOT` in
    /// database id order; messages come back in timeline order.
    pub fn load(&self, chat_id: DatabaseId<Chat>) -> Result<WorkingSet> {
        let working_set = self.db.with_conn(|conn| {
            let chat_row = ChatRepository::new(conn).get_by_id(chat_id)?;
            let messages = MessageRepository::new(conn);
            let sender_ids = messages.distinct_sender_ids_by_chat(chat_id)?;
            let media_ids = messages.distinct_media_ids_by_chat(chat_id)?;
            let user_rows = UserRepository::new(conn).get_by_ids(&sender_ids)?;
            let media_rows = MediaRepository::new(conn).get_by_ids(&media_ids)?;
            let message_rows = messages.get_by_chat_id(chat_id)?;

            let chat = Chat::from_stored(RuntimeId::ROOT, chat_id, chat_row.name, chat_row.source);
            let chat_runtime = chat.runtime_id();
            let mut working_set = WorkingSet::new(chat);

            let mut runtime_id = RuntimeId::ROOT;
            for row in user_rows {
                working_set.add_user(User::from_stored(
                    runtime_id,
                    DatabaseId::new(row.user_id),
                    row.name,
                    row.is_system,
                ))?;
                runtime_id = runtime_id.next();
            }

            let mut runtime_id = RuntimeId::ROOT;
            for row in media_rows {
                let size = row.size_bytes()?;
                working_set.add_media(Media::from_stored(
                    runtime_id,
                    DatabaseId::new(row.media_id),
                    row.media_type,
                    row.mime_type,
                    size,
                ))?;
                runtime_id = runtime_id.next();
            }

            let mut runtime_id = RuntimeId::ROOT;
            for row in message_rows {
                let timestamp = row.timestamp_utc()?;
                let sender_id = DatabaseId::new(row.sender_id);
                let sender = working_set.user_by_database_id(sender_id)?.runtime_id();
                let media = match row.media_id.map(DatabaseId::new) {
                    Some(id) => Some(Relation::resolved(
                        working_set.media_by_database_id(id)?.runtime_id(),
                        id,
                    )),
                    None => None,
                };

                working_set.add_message(Message::from_stored(
                    runtime_id,
                    DatabaseId::new(row.message_id),
                    timestamp,
                    row.text,
                    Relation::resolved(chat_runtime, chat_id),
                    Relation::resolved(sender, sender_id),
                    media,
                ));
                runtime_id = runtime_id.next();
            }

            Ok(working_set)
        })?;

        let summary = working_set.summary();
        info!(
            chat_id = chat_id.value(),
            users = summary.users,
            messages = summary.messages,
            media = summary.media,
            "Chat loaded"
        );
        Ok(working_set)
    }

    /// Every stored chat, ordered by id.
    pub fn list(&self) -> Result<Vec<ChatEntry>> {
        self.db.with_conn(|conn| {
            let rows = ChatRepository::new(conn).list()?;
            Ok(rows
                .into_iter()
                .map(|row| ChatEntry {
                    database_id: DatabaseId::new(row.chat_id),
                    name: row.name,
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatvault_core::types::{ChatSource, MediaType};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use crate::repository::SYSTEM_USER_ID;

    fn make_storage() -> (TempDir, ChatStorage) {
        let tmp = TempDir::new().unwrap();
        let storage = ChatStorage::in_memory(&tmp.path().join("media")).unwrap();
        (tmp, storage)
    }

    fn count(storage: &ChatStorage, table: &str) -> i64 {
        storage
            .database()
            .with_conn(|conn| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })
                .map_err(|e| VaultError::Storage(e.to_string()))
            })
            .unwrap()
    }

    fn make_working_set(import_name: Option<&str>) -> WorkingSet {
        let mut ws = WorkingSet::new(Chat::new(RuntimeId::ROOT, "Family", ChatSource::FormatA));
        ws.add_user(User::system(RuntimeId::ROOT)).unwrap();
        ws.add_user(User::new(RuntimeId::new(1), "Tom")).unwrap();
        ws.add_media(Media::new(
            RuntimeId::ROOT,
            MediaType::Image,
            "image/jpeg",
            4,
            import_name.map(str::to_string),
        ))
        .unwrap();
        let at = |minute| Utc.with_ymd_and_hms(2023, 10, 27, 22, minute, 0).unwrap();
        ws.add_message(Message::new(
            RuntimeId::new(0),
            at(56),
            "Hello",
            RuntimeId::ROOT,
            RuntimeId::new(1),
            None,
        ));
        ws.add_message(Message::new(
            RuntimeId::new(1),
            at(57),
            "IMG-1.jpg",
            RuntimeId::ROOT,
            RuntimeId::new(1),
            Some(RuntimeId::ROOT),
        ));
        ws.add_message(Message::new(
            RuntimeId::new(2),
            at(58),
            "Messages are encrypted",
            RuntimeId::ROOT,
            RuntimeId::ROOT,
            None,
        ));
        ws
    }

    #[test]
    fn test_save_reports_inserted_rows() {
        let (tmp, storage) = make_storage();
        let mut ws = make_working_set(None);
        let report = storage.save(&mut ws, tmp.path()).unwrap();

        assert_eq!(report.chats, 1);
        assert_eq!(report.users, 1);
        assert_eq!(report.media, 1);
        assert_eq!(report.messages, 3);
        assert_eq!(report.inserted_rows(), 6);
        assert_eq!(report.media_actions.total(), 0);
        assert_eq!(count(&storage, "users"), 2);
    }

    #[test]
    fn test_load_round_trip() {
        let (tmp, storage) = make_storage();
        let mut ws = make_working_set(None);
        storage.save(&mut ws, tmp.path()).unwrap();
        let chat_id = ws.chat().database_id().unwrap();

        let loaded = storage.load(chat_id).unwrap();
        assert_eq!(loaded.chat().name(), "Family");
        assert_eq!(loaded.chat().source(), ChatSource::FormatA);
        assert_eq!(loaded.chat().runtime_id(), RuntimeId::ROOT);
        assert_eq!(loaded.users().len(), 2);
        assert_eq!(loaded.media().len(), 1);

        // System user has the lowest id, so it gets the root runtime id.
        let system = loaded.user_by_runtime_id(RuntimeId::ROOT).unwrap();
        assert!(system.is_system());
        assert_eq!(system.database_id(), Some(DatabaseId::new(SYSTEM_USER_ID)));

        let texts: Vec<&str> = loaded.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["Hello", "IMG-1.jpg", "Messages are encrypted"]);

        for (original, reloaded) in ws.messages().iter().zip(loaded.messages()) {
            assert_eq!(original.timestamp(), reloaded.timestamp());
            assert_eq!(original.database_id(), reloaded.database_id());
            assert_eq!(original.sender().database(), reloaded.sender().database());
            let sender = loaded.user_by_runtime_id(reloaded.sender().runtime()).unwrap();
            assert_eq!(sender.database_id(), reloaded.sender().database());
        }

        let media_relation = loaded.messages()[1].media().unwrap();
        let media = loaded.media_by_runtime_id(media_relation.runtime()).unwrap();
        assert_eq!(media.mime_type(), "image/jpeg");
        assert_eq!(media.size(), 4);
        assert_eq!(media.database_id(), media_relation.database());
    }

    #[test]
    fn test_load_missing_chat() {
        let (_tmp, storage) = make_storage();
        let err = storage.load(DatabaseId::new(77)).unwrap_err();
        assert!(matches!(err, VaultError::NotFound { entity: "chat", id: 77 }));
    }

    #[test]
    fn test_load_rejects_negative_media_size() {
        let (tmp, storage) = make_storage();
        let mut ws = make_working_set(None);
        storage.save(&mut ws, tmp.path()).unwrap();
        let chat_id = ws.chat().database_id().unwrap();
        storage
            .database()
            .with_conn(|conn| {
                conn.execute("UPDATE media SET media_size = -1", [])
                    .map_err(|e| VaultError::Storage(e.to_string()))
            })
            .unwrap();

        let err = storage.load(chat_id).unwrap_err();
        assert!(matches!(err, VaultError::Storage(ref msg) if msg.contains("negative size")));
    }

    #[test]
    fn test_list_chats() {
        let (tmp, storage) = make_storage();
        assert!(storage.list().unwrap().is_empty());

        let mut first = make_working_set(None);
        storage.save(&mut first, tmp.path()).unwrap();
        let mut second = WorkingSet::new(Chat::new(RuntimeId::ROOT, "Work", ChatSource::Unknown));
        storage.save(&mut second, tmp.path()).unwrap();

        let entries = storage.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Family");
        assert_eq!(entries[1].name, "Work");
        assert_eq!(Some(entries[1].database_id), second.chat().database_id());
    }

    #[test]
    fn test_media_copied_after_commit() {
        let (tmp, storage) = make_storage();
        std::fs::write(tmp.path().join("IMG-1.jpg"), b"jpeg").unwrap();

        let mut ws = make_working_set(Some("IMG-1.jpg"));
        let report = storage.save(&mut ws, tmp.path()).unwrap();
        assert_eq!(report.media_actions.succeeded, 1);

        let path = storage.media_path(&ws.media()[0]).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}.jpeg", ws.media()[0].database_id().unwrap())
        );
        assert_eq!(std::fs::read(path).unwrap(), b"jpeg");
    }

    #[test]
    fn test_missing_media_file_does_not_fail_save() {
        let (tmp, storage) = make_storage();
        let mut ws = make_working_set(Some("gone.jpg"));
        let report = storage.save(&mut ws, tmp.path()).unwrap();

        assert_eq!(report.media_actions.failed, 1);
        assert_eq!(count(&storage, "media"), 1);
    }

    #[test]
    fn test_failed_save_rolls_back_and_skips_media() {
        let (tmp, storage) = make_storage();
        std::fs::write(tmp.path().join("IMG-1.jpg"), b"jpeg").unwrap();
        storage
            .database()
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER fail_messages BEFORE INSERT ON messages
                     BEGIN SELECT RAISE(ABORT, 'injected'); END;",
                )
                .map_err(|e| VaultError::Storage(e.to_string()))
            })
            .unwrap();

        let mut ws = make_working_set(Some("IMG-1.jpg"));
        let err = storage.save(&mut ws, tmp.path()).unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)));

        assert_eq!(count(&storage, "chats"), 0);
        assert_eq!(count(&storage, "users"), 1);
        assert_eq!(count(&storage, "media"), 0);
        assert_eq!(count(&storage, "messages"), 0);
        assert!(!storage.media_dir().exists());
    }

    #[test]
    fn test_media_path_requires_database_id() {
        let (_tmp, storage) = make_storage();
        let media = Media::new(RuntimeId::ROOT, MediaType::Audio, "audio/opus", 0, None);
        assert!(storage.media_path(&media).is_none());
    }
}
