//! Text and JSON rendering of stored chats for `view` and `inspect`.

use std::fmt::Write as _;

use serde::Serialize;

use chatvault_storage::{Chat, ChatStorage, Media, Message, User, WorkingSet};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One message per line: `YYYY-MM-DD HH:MM:SS - <sender>: <text>`.
///
/// System messages have no sender prefix. Media is shown as its managed
/// file path.
pub fn render_messages(working_set: &WorkingSet, storage: &ChatStorage) -> String {
    let mut out = String::new();
    for message in working_set.messages() {
        let _ = writeln!(out, "{}", render_message(working_set, storage, message));
    }
    out
}

fn render_message(working_set: &WorkingSet, storage: &ChatStorage, message: &Message) -> String {
    let mut body = message.text().to_string();
    if let Some(relation) = message.media() {
        let path = working_set
            .media_by_runtime_id(relation.runtime())
            .ok()
            .and_then(|media| storage.media_path(media));
        if let Some(path) = path {
            if !body.is_empty() {
                body.push(' ');
            }
            let _ = write!(body, "<{}>", path.display());
        }
    }

    let timestamp = message.timestamp().format(TIMESTAMP_FORMAT);
    match working_set.user_by_runtime_id(message.sender().runtime()) {
        Ok(user) if !user.is_system() => format!("{} - {}: {}", timestamp, user.name(), body),
        Ok(_) => format!("{} - {}", timestamp, body),
        Err(_) => format!("{} - ?: {}", timestamp, body),
    }
}

/// Serializable view of a whole working set.
#[derive(Debug, Serialize)]
pub struct WorkingSetView<'a> {
    pub chat: &'a Chat,
    pub users: &'a [User],
    pub media: &'a [Media],
    pub messages: &'a [Message],
}

impl<'a> WorkingSetView<'a> {
    pub fn new(working_set: &'a WorkingSet) -> Self {
        Self {
            chat: working_set.chat(),
            users: working_set.users(),
            media: working_set.media(),
            messages: working_set.messages(),
        }
    }
}

fn id_pair(runtime: i64, database: Option<i64>) -> String {
    match database {
        Some(db) => format!("rt={} db={}", runtime, db),
        None => format!("rt={} db=-", runtime),
    }
}

/// Plain-text dump listing both identities of every entity.
pub fn render_inspect(working_set: &WorkingSet) -> String {
    let mut out = String::new();
    let chat = working_set.chat();
    let summary = working_set.summary();
    let _ = writeln!(
        out,
        "chat [{}] {:?} source={} users={} media={} messages={}",
        id_pair(chat.runtime_id().value(), chat.database_id().map(|id| id.value())),
        chat.name(),
        chat.source().as_str(),
        summary.users,
        summary.media,
        summary.messages
    );

    for user in working_set.users() {
        let _ = writeln!(
            out,
            "user [{}] {:?}{}",
            id_pair(user.runtime_id().value(), user.database_id().map(|id| id.value())),
            user.name(),
            if user.is_system() { " (system)" } else { "" }
        );
    }

    for media in working_set.media() {
        let _ = writeln!(
            out,
            "media [{}] {} {} {} bytes",
            id_pair(media.runtime_id().value(), media.database_id().map(|id| id.value())),
            media.media_type().as_str(),
            media.mime_type(),
            media.size()
        );
    }

    for message in working_set.messages() {
        let sender = message.sender();
        let media = message
            .media()
            .map(|m| format!(" media[{}]", id_pair(m.runtime().value(), m.database().map(|id| id.value()))))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "message [{}] {} sender[{}]{} {:?}",
            id_pair(message.runtime_id().value(), message.database_id().map(|id| id.value())),
            message.timestamp().format(TIMESTAMP_FORMAT),
            id_pair(sender.runtime().value(), sender.database().map(|id| id.value())),
            media,
            message.text()
        );
    }
    out
}
