//! Entity model: chats, users, media and messages.
//!
//! Every entity carries two identities. A [`RuntimeId`] is assigned by
//! whoever builds a working set and is never persisted. A [`DatabaseId`] is
//! assigned by the store on insert; `None` means "not yet persisted". Both
//! are typed by entity kind, so a `DatabaseId<User>` can be passed neither
//! where a `RuntimeId<User>` nor where a `DatabaseId<Media>` is expected.
//!
//! Identity fields can only be patched from inside this crate.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use chatvault_core::types::{ChatSource, MediaType};

// =============================================================================
// Identifiers
// =============================================================================

/// Process-local identity of an entity of kind `K`.
pub struct RuntimeId<K> {
    value: i64,
    _kind: PhantomData<fn() -> K>,
}

impl<K> RuntimeId<K> {
    /// First runtime id handed out by a producer.
    pub const ROOT: Self = Self::new(0);

    pub const fn new(value: i64) -> Self {
        Self {
            value,
            _kind: PhantomData,
        }
    }

    pub fn value(self) -> i64 {
        self.value
    }

    pub fn next(self) -> Self {
        Self::new(self.value + 1)
    }
}

/// Store-assigned identity of an entity of kind `K`.
pub struct DatabaseId<K> {
    value: i64,
    _kind: PhantomData<fn() -> K>,
}

impl<K> DatabaseId<K> {
    pub const fn new(value: i64) -> Self {
        Self {
            value,
            _kind: PhantomData,
        }
    }

    pub fn value(self) -> i64 {
        self.value
    }
}

// Derives would put a bound on `K`, which the marker types do not satisfy.
macro_rules! impl_id_traits {
    ($name:ident, $label:literal) => {
        impl<K> Clone for $name<K> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<K> Copy for $name<K> {}

        impl<K> PartialEq for $name<K> {
            fn eq(&self, other: &Self) -> bool {
                self.value == other.value
            }
        }

        impl<K> Eq for $name<K> {}

        impl<K> PartialOrd for $name<K> {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl<K> Ord for $name<K> {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.value.cmp(&other.value)
            }
        }

        impl<K> Hash for $name<K> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.value.hash(state);
            }
        }

        impl<K> fmt::Debug for $name<K> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.value)
            }
        }

        impl<K> fmt::Display for $name<K> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.value)
            }
        }

        impl<K> From<$name<K>> for i64 {
            fn from(id: $name<K>) -> i64 {
                id.value
            }
        }

        impl<K> Serialize for $name<K> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_i64(self.value)
            }
        }
    };
}

impl_id_traits!(RuntimeId, "RuntimeId");
impl_id_traits!(DatabaseId, "DatabaseId");

/// A message's reference to another entity, carrying both identity spaces.
///
/// The runtime side is always known. The database side is filled in while
/// the message is persisted, or when the message is loaded from the store.
pub struct Relation<K> {
    runtime: RuntimeId<K>,
    database: Option<DatabaseId<K>>,
}

impl<K> Relation<K> {
    pub fn new(runtime: RuntimeId<K>) -> Self {
        Self {
            runtime,
            database: None,
        }
    }

    pub fn resolved(runtime: RuntimeId<K>, database: DatabaseId<K>) -> Self {
        Self {
            runtime,
            database: Some(database),
        }
    }

    pub fn runtime(&self) -> RuntimeId<K> {
        self.runtime
    }

    pub fn database(&self) -> Option<DatabaseId<K>> {
        self.database
    }

    pub(crate) fn resolve(&mut self, database: DatabaseId<K>) {
        self.database = Some(database);
    }
}

impl<K> Clone for Relation<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Relation<K> {}

impl<K> PartialEq for Relation<K> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.database == other.database
    }
}

impl<K> Eq for Relation<K> {}

impl<K> fmt::Debug for Relation<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("runtime", &self.runtime)
            .field("database", &self.database)
            .finish()
    }
}

impl<K> Serialize for Relation<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Relation", 2)?;
        state.serialize_field("runtime_id", &self.runtime)?;
        state.serialize_field("database_id", &self.database)?;
        state.end()
    }
}

// =============================================================================
// Entities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chat {
    runtime_id: RuntimeId<Chat>,
    database_id: Option<DatabaseId<Chat>>,
    name: String,
    source: ChatSource,
}

impl Chat {
    pub fn new(runtime_id: RuntimeId<Chat>, name: impl Into<String>, source: ChatSource) -> Self {
        Self {
            runtime_id,
            database_id: None,
            name: name.into(),
            source,
        }
    }

    pub(crate) fn from_stored(
        runtime_id: RuntimeId<Chat>,
        database_id: DatabaseId<Chat>,
        name: String,
        source: ChatSource,
    ) -> Self {
        Self {
            runtime_id,
            database_id: Some(database_id),
            name,
            source,
        }
    }

    pub fn runtime_id(&self) -> RuntimeId<Chat> {
        self.runtime_id
    }

    pub fn database_id(&self) -> Option<DatabaseId<Chat>> {
        self.database_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> ChatSource {
        self.source
    }

    pub(crate) fn set_database_id(&mut self, id: DatabaseId<Chat>) {
        debug_assert!(self.database_id.is_none(), "chat database id assigned twice");
        self.database_id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    runtime_id: RuntimeId<User>,
    database_id: Option<DatabaseId<User>>,
    name: String,
    is_system: bool,
}

impl User {
    pub fn new(runtime_id: RuntimeId<User>, name: impl Into<String>) -> Self {
        Self {
            runtime_id,
            database_id: None,
            name: name.into(),
            is_system: false,
        }
    }

    /// The sender of system-generated messages.
    pub fn system(runtime_id: RuntimeId<User>) -> Self {
        Self {
            runtime_id,
            database_id: None,
            name: String::new(),
            is_system: true,
        }
    }

    pub(crate) fn from_stored(
        runtime_id: RuntimeId<User>,
        database_id: DatabaseId<User>,
        name: String,
        is_system: bool,
    ) -> Self {
        Self {
            runtime_id,
            database_id: Some(database_id),
            name,
            is_system,
        }
    }

    pub fn runtime_id(&self) -> RuntimeId<User> {
        self.runtime_id
    }

    pub fn database_id(&self) -> Option<DatabaseId<User>> {
        self.database_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    pub(crate) fn set_database_id(&mut self, id: DatabaseId<User>) {
        debug_assert!(self.database_id.is_none(), "user database id assigned twice");
        self.database_id = Some(id);
    }

    /// Take over name and identity of an existing stored user.
    ///
    /// Unlike `set_database_id` this may replace an id that is already
    /// set, e.g. when a loaded working set is re-pointed at another stored
    /// user.
    pub(crate) fn merge_stored(&mut self, id: DatabaseId<User>, name: String) {
        self.database_id = Some(id);
        self.name = name;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Media {
    runtime_id: RuntimeId<Media>,
    database_id: Option<DatabaseId<Media>>,
    media_type: MediaType,
    size: u64,
    mime_type: String,
    /// Original file name inside the export, relative to the import root.
    import_name: Option<String>,
}

impl Media {
    pub fn new(
        runtime_id: RuntimeId<Media>,
        media_type: MediaType,
        mime_type: impl Into<String>,
        size: u64,
        import_name: Option<String>,
    ) -> Self {
        Self {
            runtime_id,
            database_id: None,
            media_type,
            size,
            mime_type: mime_type.into(),
            import_name,
        }
    }

    pub(crate) fn from_stored(
        runtime_id: RuntimeId<Media>,
        database_id: DatabaseId<Media>,
        media_type: MediaType,
        mime_type: String,
        size: u64,
    ) -> Self {
        Self {
            runtime_id,
            database_id: Some(database_id),
            media_type,
            size,
            mime_type,
            import_name: None,
        }
    }

    pub fn runtime_id(&self) -> RuntimeId<Media> {
        self.runtime_id
    }

    pub fn database_id(&self) -> Option<DatabaseId<Media>> {
        self.database_id
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn import_name(&self) -> Option<&str> {
        self.import_name.as_deref()
    }

    pub(crate) fn set_database_id(&mut self, id: DatabaseId<Media>) {
        debug_assert!(self.database_id.is_none(), "media database id assigned twice");
        self.database_id = Some(id);
    }

    pub(crate) fn take_import_name(&mut self) -> Option<String> {
        self.import_name.take()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    runtime_id: RuntimeId<Message>,
    database_id: Option<DatabaseId<Message>>,
    timestamp: DateTime<Utc>,
    text: String,
    chat: Relation<Chat>,
    sender: Relation<User>,
    media: Option<Relation<Media>>,
}

impl Message {
    pub fn new(
        runtime_id: RuntimeId<Message>,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
        chat: RuntimeId<Chat>,
        sender: RuntimeId<User>,
        media: Option<RuntimeId<Media>>,
    ) -> Self {
        Self {
            runtime_id,
            database_id: None,
            timestamp,
            text: text.into(),
            chat: Relation::new(chat),
            sender: Relation::new(sender),
            media: media.map(Relation::new),
        }
    }

    pub(crate) fn from_stored(
        runtime_id: RuntimeId<Message>,
        database_id: DatabaseId<Message>,
        timestamp: DateTime<Utc>,
        text: String,
        chat: Relation<Chat>,
        sender: Relation<User>,
        media: Option<Relation<Media>>,
    ) -> Self {
        Self {
            runtime_id,
            database_id: Some(database_id),
            timestamp,
            text,
            chat,
            sender,
            media,
        }
    }

    pub fn runtime_id(&self) -> RuntimeId<Message> {
        self.runtime_id
    }

    pub fn database_id(&self) -> Option<DatabaseId<Message>> {
        self.database_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Append a continuation line to the message text.
    pub fn append_line(&mut self, line: &str) {
        self.text.push('\n');
        self.text.push_str(line);
    }

    pub fn chat(&self) -> Relation<Chat> {
        self.chat
    }

    pub fn sender(&self) -> Relation<User> {
        self.sender
    }

    pub fn media(&self) -> Option<Relation<Media>> {
        self.media
    }

    pub(crate) fn set_database_id(&mut self, id: DatabaseId<Message>) {
        debug_assert!(self.database_id.is_none(), "message database id assigned twice");
        self.database_id = Some(id);
    }

    pub(crate) fn chat_mut(&mut self) -> &mut Relation<Chat> {
        &mut self.chat
    }

    pub(crate) fn sender_mut(&mut self) -> &mut Relation<User> {
        &mut self.sender
    }

    pub(crate) fn media_mut(&mut self) -> Option<&mut Relation<Media>> {
        self.media.as_mut()
    }
}
