//! The working set: one chat with its users, media and messages.
//!
//! A working set is built either by an importer (every database id unset)
//! or by [`crate::ChatStorage::load`] (every database id set). Users and
//! media are indexed by both identity spaces. Every mutation of the
//! backing collections goes through this type so the indices never go
//! stale.
//!
//! The `persist_*` steps are crate-private and run inside the engine's
//! transaction, in chat, users, media, messages order.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use chatvault_core::error::{Result, VaultError};
use chatvault_core::types::media_extension;

use crate::media_actions::{MediaAction, MediaActionQueue};
use crate::model::{Chat, DatabaseId, Media, Message, RuntimeId, User};
use crate::repository::{
    ChatRepository, ChatRow, MediaRepository, MediaRow, MessageRepository, MessageRow,
    UserRepository, UserRow,
};

/// Entity counts of a working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkingSetSummary {
    pub users: usize,
    pub messages: usize,
    pub media: usize,
}

#[derive(Debug, Clone)]
pub struct WorkingSet {
    chat: Chat,
    users: Vec<User>,
    messages: Vec<Message>,
    media: Vec<Media>,

    user_by_runtime: HashMap<RuntimeId<User>, usize>,
    user_by_database: HashMap<DatabaseId<User>, usize>,
    media_by_runtime: HashMap<RuntimeId<Media>, usize>,
    media_by_database: HashMap<DatabaseId<Media>, usize>,

    /// Requests to merge an imported user into an existing stored one.
    user_mappings: Vec<(RuntimeId<User>, DatabaseId<User>)>,
}

impl WorkingSet {
    pub fn new(chat: Chat) -> Self {
        Self {
            chat,
            users: Vec::new(),
            messages: Vec::new(),
            media: Vec::new(),
            user_by_runtime: HashMap::new(),
            user_by_database: HashMap::new(),
            media_by_runtime: HashMap::new(),
            media_by_database: HashMap::new(),
            user_mappings: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Chat
    // -------------------------------------------------------------------------

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn set_chat(&mut self, chat: Chat) {
        self.chat = chat;
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Append a user. Fails without changing the working set if either of
    /// its ids is already taken.
    pub fn add_user(&mut self, user: User) -> Result<()> {
        let index = self.users.len();
        insert_unique(&mut self.user_by_runtime, user.runtime_id(), index, "user")?;
        if let Some(id) = user.database_id() {
            if let Err(e) = insert_unique(&mut self.user_by_database, id, index, "user") {
                self.user_by_runtime.remove(&user.runtime_id());
                return Err(e);
            }
        }
        self.users.push(user);
        Ok(())
    }

    /// Replace every user and rebuild both user indices.
    ///
    /// On a duplicate id the previous users are kept.
    pub fn set_users(&mut self, users: Vec<User>) -> Result<()> {
        let (by_runtime, by_database) =
            build_indices(&users, User::runtime_id, User::database_id, "user")?;
        self.users = users;
        self.user_by_runtime = by_runtime;
        self.user_by_database = by_database;
        Ok(())
    }

    pub fn user_by_runtime_id(&self, id: RuntimeId<User>) -> Result<&User> {
        self.user_by_runtime
            .get(&id)
            .map(|&index| &self.users[index])
            .ok_or_else(|| VaultError::not_found("user", id.value()))
    }

    pub fn user_by_database_id(&self, id: DatabaseId<User>) -> Result<&User> {
        self.user_by_database
            .get(&id)
            .map(|&index| &self.users[index])
            .ok_or_else(|| VaultError::not_found("user", id.value()))
    }

    /// Request that the user with `runtime_id` is merged into the stored
    /// user `database_id` on the next save.
    pub fn register_user_mapping(&mut self, runtime_id: RuntimeId<User>, database_id: DatabaseId<User>) {
        self.user_mappings.push((runtime_id, database_id));
    }

    pub fn user_mappings(&self) -> &[(RuntimeId<User>, DatabaseId<User>)] {
        &self.user_mappings
    }

    // -------------------------------------------------------------------------
    // Media
    // -------------------------------------------------------------------------

    pub fn media(&self) -> &[Media] {
        &self.media
    }

    /// Append a media item. Fails without changing the working set if
    /// either of its ids is already taken.
    pub fn add_media(&mut self, media: Media) -> Result<()> {
        let index = self.media.len();
        insert_unique(&mut self.media_by_runtime, media.runtime_id(), index, "media")?;
        if let Some(id) = media.database_id() {
            if let Err(e) = insert_unique(&mut self.media_by_database, id, index, "media") {
                self.media_by_runtime.remove(&media.runtime_id());
                return Err(e);
            }
        }
        self.media.push(media);
        Ok(())
    }

    /// Replace every media item and rebuild both media indices.
    ///
    /// On a duplicate id the previous media are kept.
    pub fn set_media(&mut self, media: Vec<Media>) -> Result<()> {
        let (by_runtime, by_database) =
            build_indices(&media, Media::runtime_id, Media::database_id, "media")?;
        self.media = media;
        self.media_by_runtime = by_runtime;
        self.media_by_database = by_database;
        Ok(())
    }

    pub fn media_by_runtime_id(&self, id: RuntimeId<Media>) -> Result<&Media> {
        self.media_by_runtime
            .get(&id)
            .map(|&index| &self.media[index])
            .ok_or_else(|| VaultError::not_found("media", id.value()))
    }

    pub fn media_by_database_id(&self, id: DatabaseId<Media>) -> Result<&Media> {
        self.media_by_database
            .get(&id)
            .map(|&index| &self.media[index])
            .ok_or_else(|| VaultError::not_found("media", id.value()))
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Mutable access to message content, e.g. to append continuation lines.
    pub fn messages_mut(&mut self) -> &mut [Message] {
        &mut self.messages
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn summary(&self) -> WorkingSetSummary {
        WorkingSetSummary {
            users: self.users.len(),
            messages: self.messages.len(),
            media: self.media.len(),
        }
    }

    // =========================================================================
    // Commit phase
    // =========================================================================

    /// Insert the chat unless it already has a database id.
    pub(crate) fn persist_chat(&mut self, conn: &Connection) -> Result<usize> {
        if self.chat.database_id().is_some() {
            return Ok(0);
        }
        let id = ChatRepository::new(conn).insert(&ChatRow::from_chat(&self.chat))?;
        self.chat.set_database_id(id);
        debug!(chat_id = id.value(), "Chat persisted");
        Ok(1)
    }

    /// Resolve or insert every user, honouring registered mappings.
    ///
    /// System users are looked up, never inserted. A mapping replaces the
    /// user's name and id with the stored row's. The mapping list is
    /// consumed.
    pub(crate) fn persist_users(&mut self, conn: &Connection) -> Result<usize> {
        let repo = UserRepository::new(conn);
        let mut inserted = 0;

        for index in 0..self.users.len() {
            let runtime_id = self.users[index].runtime_id();

            if self.users[index].is_system() {
                if self.users[index].database_id().is_none() {
                    let id = repo.system_user_id()?;
                    self.users[index].set_database_id(id);
                    self.user_by_database.insert(id, index);
                }
                continue;
            }

            let mapped = self
                .user_mappings
                .iter()
                .find(|(runtime, _)| *runtime == runtime_id)
                .map(|&(_, database)| database);

            if let Some(existing) = mapped {
                let row = repo.get_by_id(existing)?;
                if let Some(previous) = self.users[index].database_id() {
                    self.user_by_database.remove(&previous);
                }
                self.users[index].merge_stored(existing, row.name);
                self.user_by_database.insert(existing, index);
                debug!(
                    runtime_id = runtime_id.value(),
                    user_id = existing.value(),
                    "User merged into stored user"
                );
            }

            if self.users[index].database_id().is_none() {
                let id = repo.insert(&UserRow::from_user(&self.users[index]))?;
                self.users[index].set_database_id(id);
                self.user_by_database.insert(id, index);
                inserted += 1;
            }
        }

        self.user_mappings.clear();
        Ok(inserted)
    }

    /// Insert every unpersisted media item and queue a copy of its file.
    pub(crate) fn persist_media(
        &mut self,
        conn: &Connection,
        queue: &mut MediaActionQueue,
    ) -> Result<usize> {
        let repo = MediaRepository::new(conn);
        let mut inserted = 0;

        for (index, media) in self.media.iter_mut().enumerate() {
            if media.database_id().is_some() {
                continue;
            }
            let id = repo.insert(&MediaRow::from_media(media))?;
            media.set_database_id(id);
            self.media_by_database.insert(id, index);
            inserted += 1;

            if let Some(source) = media.take_import_name() {
                let destination = format!("{}.{}", id.value(), media_extension(media.mime_type()));
                queue.push(MediaAction::copy(source, destination));
            }
        }

        Ok(inserted)
    }

    /// Insert every unpersisted message after resolving its relations.
    ///
    /// Fails with `NotFound` if a message references a chat, sender or
    /// media runtime id that is not part of this working set.
    pub(crate) fn persist_messages(&mut self, conn: &Connection) -> Result<usize> {
        let chat_runtime = self.chat.runtime_id();
        let chat_id = self
            .chat
            .database_id()
            .ok_or_else(|| VaultError::not_found("chat", chat_runtime.value()))?;
        let repo = MessageRepository::new(conn);
        let mut inserted = 0;

        for message in self.messages.iter_mut() {
            if message.database_id().is_some() {
                continue;
            }

            let message_chat = message.chat().runtime();
            if message_chat != chat_runtime {
                return Err(VaultError::not_found("chat", message_chat.value()));
            }

            let sender_runtime = message.sender().runtime();
            let sender_id = self
                .user_by_runtime
                .get(&sender_runtime)
                .and_then(|&index| self.users[index].database_id())
                .ok_or_else(|| VaultError::not_found("user", sender_runtime.value()))?;

            let media_id = match message.media() {
                Some(relation) => Some(
                    self.media_by_runtime
                        .get(&relation.runtime())
                        .and_then(|&index| self.media[index].database_id())
                        .ok_or_else(|| VaultError::not_found("media", relation.runtime().value()))?,
                ),
                None => None,
            };

            message.chat_mut().resolve(chat_id);
            message.sender_mut().resolve(sender_id);
            if let (Some(relation), Some(id)) = (message.media_mut(), media_id) {
                relation.resolve(id);
            }

            let id = repo.insert(&MessageRow::from_message(message, chat_id, sender_id, media_id))?;
            message.set_database_id(id);
            inserted += 1;
        }

        Ok(inserted)
    }
}

fn insert_unique<I>(
    index: &mut HashMap<I, usize>,
    id: I,
    position: usize,
    entity: &'static str,
) -> Result<()>
where
    I: std::hash::Hash + Eq + Copy + Into<i64>,
{
    match index.entry(id) {
        Entry::Occupied(_) => Err(VaultError::duplicate(entity, id.into())),
        Entry::Vacant(slot) => {
            slot.insert(position);
            Ok(())
        }
    }
}

type Indices<K> = (HashMap<RuntimeId<K>, usize>, HashMap<DatabaseId<K>, usize>);

fn build_indices<K, T>(
    items: &[T],
    runtime_id: fn(&T) -> RuntimeId<K>,
    database_id: fn(&T) -> Option<DatabaseId<K>>,
    entity: &'static str,
) -> Result<Indices<K>> {
    let mut by_runtime = HashMap::with_capacity(items.len());
    let mut by_database = HashMap::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        insert_unique(&mut by_runtime, runtime_id(item), position, entity)?;
        if let Some(id) = database_id(item) {
            insert_unique(&mut by_database, id, position, entity)?;
        }
    }
    Ok((by_runtime, by_database))
}
