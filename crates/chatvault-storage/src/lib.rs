//! Chatvault storage crate - entity model, working set and persistence.
//!
//! Provides the dual-identity entity model, the working set that indexes
//! it, row repositories over a WAL-mode SQLite database, the deferred
//! media action queue, and `ChatStorage`, which commits working sets
//! atomically and loads them back.

pub mod context;
pub mod db;
pub mod media_actions;
pub mod migrations;
pub mod model;
pub mod persistence;
pub mod repository;

pub use context::{WorkingSet, WorkingSetSummary};
pub use db::Database;
pub use media_actions::{
    is_confined_relative, ActionReport, MediaAction, MediaActionKind, MediaActionQueue,
};
pub use model::{Chat, DatabaseId, Media, Message, Relation, RuntimeId, User};
pub use persistence::{ChatEntry, ChatStorage, SaveReport};
pub use repository::{
    ChatRepository, ChatRow, MediaRepository, MediaRow, MessageRepository, MessageRow,
    UserRepository, UserRow, DEFAULT_ACCOUNT_ID, SYSTEM_USER_ID, SYSTEM_USER_NAME,
};
