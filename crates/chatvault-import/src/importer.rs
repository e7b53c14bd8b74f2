//! Turns a text export into a [`WorkingSet`].
//!
//! Every entity in the produced working set carries a runtime id only.
//! Users are identified by exact name within one export and numbered from
//! 1 in order of first appearance; the system user, created on first use,
//! takes runtime id 0. Media and messages are numbered from 0.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use chatvault_core::config::ImportConfig;
use chatvault_core::types::ChatSource;
use chatvault_storage::{
    is_confined_relative, Chat, DatabaseId, Media, Message, RuntimeId, User, WorkingSet,
};

use crate::error::ImportError;
use crate::parser::{normalize_whitespace, Attachment, LineFormat, ParsedLine, Payload};

/// Longest first-line excerpt carried in an `UnsupportedFormat` error.
const FORMAT_ERROR_EXCERPT: usize = 80;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub chat_name: String,
    pub source: ChatSource,
    /// `(user name, stored user id)` pairs: merge the named imported user
    /// into an existing stored user.
    pub user_mapping: Vec<(String, i64)>,
    /// Directory holding the export's attachments.
    pub media_root: Option<PathBuf>,
    /// Read attachment sizes from `media_root`.
    pub compute_media_size: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default())
    }
}

impl ImportOptions {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            chat_name: config.default_chat_name.clone(),
            source: ChatSource::FormatA,
            user_mapping: Vec::new(),
            media_root: None,
            compute_media_size: config.compute_media_size,
        }
    }
}

/// Line counters of one import, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ImportStats {
    lines: usize,
    messages: usize,
    continuations: usize,
    skipped: usize,
}

/// Parse an export file. Attachments are looked up next to the file
/// unless `options.media_root` says otherwise.
pub fn import_from_file(path: &Path, options: &ImportOptions) -> Result<WorkingSet, ImportError> {
    let file = File::open(path)?;
    let mut options = options.clone();
    if options.media_root.is_none() {
        options.media_root = path.parent().map(Path::to_path_buf);
    }
    info!(path = %path.display(), "Importing chat export");
    import_from_reader(BufReader::new(file), &options)
}

/// Parse an export from any buffered reader.
///
/// The first line selects the line format; an export whose first line
/// matches no known format is rejected.
pub fn import_from_reader<R: BufRead>(
    reader: R,
    options: &ImportOptions,
) -> Result<WorkingSet, ImportError> {
    let mut lines = reader.lines();
    let first = match lines.next() {
        Some(line) => normalize_whitespace(&line?),
        None => return Err(ImportError::UnsupportedFormat(String::new())),
    };
    let format = LineFormat::detect(&first).ok_or_else(|| {
        ImportError::UnsupportedFormat(first.chars().take(FORMAT_ERROR_EXCERPT).collect())
    })?;
    debug!(layout = ?format.layout(), platform = ?format.platform(), "Export format");

    let mut builder = WorkingSetBuilder::new(options);
    builder.push(format.parse_line(&first))?;
    for line in lines {
        let line = normalize_whitespace(&line?);
        builder.push(format.parse_line(&line))?;
    }

    Ok(builder.finish())
}

struct WorkingSetBuilder<'o> {
    options: &'o ImportOptions,
    working_set: WorkingSet,
    users_by_name: HashMap<String, RuntimeId<User>>,
    system_user: Option<RuntimeId<User>>,
    next_user: RuntimeId<User>,
    next_media: RuntimeId<Media>,
    next_message: RuntimeId<Message>,
    /// Index of the text message continuation lines are appended to.
    open_message: Option<usize>,
    stats: ImportStats,
}

impl<'o> WorkingSetBuilder<'o> {
    fn new(options: &'o ImportOptions) -> Self {
        let chat = Chat::new(RuntimeId::ROOT, options.chat_name.clone(), options.source);
        Self {
            options,
            working_set: WorkingSet::new(chat),
            users_by_name: HashMap::new(),
            system_user: None,
            next_user: RuntimeId::ROOT.next(),
            next_media: RuntimeId::ROOT,
            next_message: RuntimeId::ROOT,
            open_message: None,
            stats: ImportStats::default(),
        }
    }

    fn push(&mut self, line: ParsedLine) -> Result<(), ImportError> {
        self.stats.lines += 1;
        match line {
            ParsedLine::Message {
                timestamp,
                sender: Some(name),
                payload,
            } => {
                let sender = self.user(name)?;
                match payload {
                    Payload::Text(text) => {
                        self.open_message = Some(self.working_set.messages().len());
                        self.add_message(timestamp, text, sender, None);
                    }
                    Payload::Attachment(attachment) => {
                        let media = self.media(attachment)?;
                        self.open_message = None;
                        self.add_message(timestamp, String::new(), sender, Some(media));
                    }
                }
            }
            ParsedLine::Message {
                timestamp,
                sender: None,
                payload,
            } => {
                let text = match payload {
                    Payload::Text(text) => text,
                    Payload::Attachment(attachment) => attachment.file_name,
                };
                let sender = self.system_user()?;
                self.open_message = None;
                self.add_message(timestamp, text, sender, None);
            }
            ParsedLine::InvalidTimestamp { raw } => {
                warn!(datetime = %raw, line = self.stats.lines, "Skipping line with unparseable date");
                self.open_message = None;
                self.stats.skipped += 1;
            }
            ParsedLine::Continuation(text) => match self.open_message {
                Some(index) => {
                    self.working_set.messages_mut()[index].append_line(&text);
                    self.stats.continuations += 1;
                }
                None => {
                    debug!(line = self.stats.lines, "Dropping line without message");
                    self.stats.skipped += 1;
                }
            },
        }
        Ok(())
    }

    fn user(&mut self, name: String) -> Result<RuntimeId<User>, ImportError> {
        if let Some(&id) = self.users_by_name.get(&name) {
            return Ok(id);
        }
        let id = self.next_user;
        self.next_user = id.next();
        debug!(user = %name, runtime_id = id.value(), "New user");
        self.working_set.add_user(User::new(id, name.clone()))?;
        self.users_by_name.insert(name, id);
        Ok(id)
    }

    fn system_user(&mut self) -> Result<RuntimeId<User>, ImportError> {
        if let Some(id) = self.system_user {
            return Ok(id);
        }
        self.working_set.add_user(User::system(RuntimeId::ROOT))?;
        self.system_user = Some(RuntimeId::ROOT);
        Ok(RuntimeId::ROOT)
    }

    fn media(&mut self, attachment: Attachment) -> Result<RuntimeId<Media>, ImportError> {
        let id = self.next_media;
        self.next_media = id.next();

        let confined = is_confined_relative(Path::new(&attachment.file_name));
        if !confined {
            warn!(
                file = %attachment.file_name,
                line = self.stats.lines,
                "Attachment path points outside the export, file will not be read"
            );
        }

        let size = match (&self.options.media_root, self.options.compute_media_size) {
            (Some(root), true) if confined => std::fs::metadata(root.join(&attachment.file_name))
                .map(|meta| meta.len())
                .unwrap_or_else(|e| {
                    debug!(file = %attachment.file_name, error = %e, "Attachment size unavailable");
                    0
                }),
            _ => 0,
        };

        self.working_set.add_media(Media::new(
            id,
            attachment.media_type,
            attachment.mime_type,
            size,
            Some(attachment.file_name),
        ))?;
        Ok(id)
    }

    fn add_message(
        &mut self,
        timestamp: chrono::DateTime<chrono::Utc>,
        text: String,
        sender: RuntimeId<User>,
        media: Option<RuntimeId<Media>>,
    ) {
        let id = self.next_message;
        self.next_message = id.next();
        self.working_set.add_message(Message::new(
            id,
            timestamp,
            text,
            RuntimeId::ROOT,
            sender,
            media,
        ));
        self.stats.messages += 1;
    }

    fn finish(mut self) -> WorkingSet {
        for (name, database_id) in &self.options.user_mapping {
            match self.users_by_name.get(name) {
                Some(&runtime_id) => {
                    self.working_set
                        .register_user_mapping(runtime_id, DatabaseId::new(*database_id));
                }
                None => warn!(user = %name, "User mapping names no user in this export"),
            }
        }

        let summary = self.working_set.summary();
        info!(
            lines = self.stats.lines,
            messages = self.stats.messages,
            continuations = self.stats.continuations,
            skipped = self.stats.skipped,
            users = summary.users,
            media = summary.media,
            "Export parsed"
        );
        self.working_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatvault_core::types::MediaType;
    use std::io::Cursor;

    fn import(text: &str) -> WorkingSet {
        import_from_reader(Cursor::new(text), &ImportOptions::default()).unwrap()
    }

    #[test]
    fn test_simple_text_message() {
        let ws = import("27.10.23, 22:56 - Tom: Hello again friend");
        assert_eq!(ws.messages().len(), 1);
        assert_eq!(ws.users().len(), 1);
        assert_eq!(ws.messages()[0].text(), "Hello again friend");

        let tom = &ws.users()[0];
        assert_eq!(tom.name(), "Tom");
        assert_eq!(tom.runtime_id(), RuntimeId::new(1));
        assert_eq!(ws.messages()[0].sender().runtime(), tom.runtime_id());
        assert!(tom.database_id().is_none());
    }

    #[test]
    fn test_simple_system_message() {
        let ws = import("27.10.23, 22:56 - Message is encrypted");
        assert_eq!(ws.messages().len(), 1);
        assert_eq!(ws.users().len(), 1);
        assert!(ws.users()[0].is_system());
        assert_eq!(ws.users()[0].runtime_id(), RuntimeId::ROOT);
        assert_eq!(ws.messages()[0].text(), "Message is encrypted");
    }

    #[test]
    fn test_attachment_creates_media() {
        let ws = import("27.10.23, 22:56 - Tom: \u{200E}IMG-20231027-WA0011.jpg (something)");
        assert_eq!(ws.messages().len(), 1);
        assert_eq!(ws.media().len(), 1);

        let media = &ws.media()[0];
        assert_eq!(media.runtime_id(), RuntimeId::ROOT);
        assert_eq!(media.mime_type(), "image/jpeg");
        assert_eq!(media.media_type(), MediaType::Image);
        assert_eq!(media.import_name(), Some("IMG-20231027-WA0011.jpg"));
        assert_eq!(
            ws.messages()[0].media().map(|m| m.runtime()),
            Some(media.runtime_id())
        );
    }

    #[test]
    fn test_users_numbered_by_first_appearance() {
        let ws = import(
            "27.10.23, 22:56 - Tom: a\n\
             27.10.23, 22:57 - Ann: b\n\
             27.10.23, 22:58 - Tom: c\n\
             27.10.23, 22:59 - Ann left\n",
        );
        let names: Vec<(&str, i64)> = ws
            .users()
            .iter()
            .map(|u| (u.name(), u.runtime_id().value()))
            .collect();
        assert_eq!(names, vec![("Tom", 1), ("Ann", 2), ("", 0)]);

        let ids: Vec<i64> = ws.messages().iter().map(|m| m.runtime_id().value()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_continuation_lines_join_last_text() {
        let ws = import(
            "27.10.23, 22:56 - Tom: first\n\
             second\n\
             \n\
             27.10.23, 22:57 - Ann: other\n",
        );
        assert_eq!(ws.messages()[0].text(), "first\nsecond\n");
        assert_eq!(ws.messages()[1].text(), "other");
    }

    #[test]
    fn test_continuation_after_system_message_dropped() {
        let ws = import(
            "27.10.23, 22:56 - Tom: first\n\
             27.10.23, 22:57 - Ann joined\n\
             stray\n",
        );
        assert_eq!(ws.messages()[0].text(), "first");
        assert_eq!(ws.messages()[1].text(), "Ann joined");
    }

    #[test]
    fn test_invalid_date_skips_only_that_line() {
        let ws = import(
            "27.10.23, 22:56 - Tom: first\n\
             31.02.23, 22:57 - Tom: broken\n\
             27.10.23, 22:58 - Tom: third\n",
        );
        let texts: Vec<&str> = ws.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["first", "third"]);
    }

    #[test]
    fn test_unsupported_format() {
        let err = import_from_reader(Cursor::new("not a chat\n"), &ImportOptions::default())
            .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(line) if line == "not a chat"));
    }

    #[test]
    fn test_empty_export_is_unsupported() {
        let err = import_from_reader(Cursor::new(""), &ImportOptions::default()).unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_user_mapping_registered_by_name() {
        let options = ImportOptions {
            user_mapping: vec![("Ann".to_string(), 12), ("Nobody".to_string(), 13)],
            ..ImportOptions::default()
        };
        let ws = import_from_reader(
            Cursor::new("27.10.23, 22:56 - Tom: a\n27.10.23, 22:57 - Ann: b\n"),
            &options,
        )
        .unwrap();
        assert_eq!(
            ws.user_mappings(),
            &[(RuntimeId::new(2), DatabaseId::new(12))]
        );
    }

    #[test]
    fn test_chat_name_and_source() {
        let options = ImportOptions {
            chat_name: "Family".to_string(),
            ..ImportOptions::default()
        };
        let ws = import_from_reader(Cursor::new("27.10.23, 22:56 - Tom: a"), &options).unwrap();
        assert_eq!(ws.chat().name(), "Family");
        assert_eq!(ws.chat().source(), ChatSource::FormatA);
        assert_eq!(ws.chat().runtime_id(), RuntimeId::ROOT);
    }

    #[test]
    fn test_media_size_read_from_media_root() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("chat.txt");
        std::fs::write(
            &export,
            "27.10.23, 22:56 - Tom: PTT-1.opus (file attached)\n\
             27.10.23, 22:57 - Tom: missing.mp4 (file attached)\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("PTT-1.opus"), vec![0u8; 321]).unwrap();

        let ws = import_from_file(&export, &ImportOptions::default()).unwrap();
        assert_eq!(ws.media()[0].size(), 321);
        assert_eq!(ws.media()[0].media_type(), MediaType::Audio);
        assert_eq!(ws.media()[1].size(), 0);
        assert_eq!(ws.media()[1].runtime_id(), RuntimeId::new(1));
    }

    #[test]
    fn test_attachment_outside_media_root_not_read() {
        let dir = tempfile::tempdir().unwrap();
        let export_dir = dir.path().join("export");
        std::fs::create_dir_all(&export_dir).unwrap();
        let outside = dir.path().join("outside.opus");
        std::fs::write(&outside, vec![0u8; 99]).unwrap();

        let export = export_dir.join("chat.txt");
        std::fs::write(
            &export,
            format!(
                "27.10.23, 22:56 - Tom: ../outside.opus (file attached)\n\
                 27.10.23, 22:57 - Tom: {} (file attached)\n",
                outside.display()
            ),
        )
        .unwrap();

        let ws = import_from_file(&export, &ImportOptions::default()).unwrap();
        assert_eq!(ws.media().len(), 2);
        assert!(ws.media().iter().all(|m| m.size() == 0));
    }

    #[test]
    fn test_import_from_missing_file() {
        let err = import_from_file(Path::new("/nonexistent/chat.txt"), &ImportOptions::default())
            .unwrap_err();
        assert!(matches!(err, ImportError::Io(_)));
    }

    #[test]
    fn test_bom_and_crlf_export() {
        let ws = import("\u{FEFF}27.10.23, 22:56 - Tom: a\r\n27.10.23, 22:57 - Tom: b\r\n");
        let texts: Vec<&str> = ws.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }
}
