//! Line parser for text chat exports.
//!
//! An export line looks like `<datetime> - <sender>: <text>` (Android) or
//! `[<datetime>] <sender>: <text>` (iOS), with the datetime layout
//! depending on the phone's locale. The first line of an export picks one
//! [`LineFormat`] out of a fixed, ordered candidate list; every following
//! line is parsed with that format.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tracing::trace;

use chatvault_core::types::MediaType;

// =============================================================================
// Candidates
// =============================================================================

/// Datetime layout family of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateLayout {
    /// `27.10.23, 22:56` with optional seconds.
    German,
    /// `25/11/2022, 20:57` with optional seconds.
    English24h,
    /// `4/11/24, 9:29 pm` (month first).
    English12h,
    /// `4/11/24, 9:29:23 pm` (month first).
    English12hSeconds,
}

impl DateLayout {
    const ALL: [DateLayout; 4] = [
        DateLayout::German,
        DateLayout::English24h,
        DateLayout::English12h,
        DateLayout::English12hSeconds,
    ];

    fn pattern(self) -> &'static str {
        match self {
            DateLayout::German => r"\d{1,2}\.\d{1,2}\.\d{2,4}, \d{1,2}:\d{2}(?::\d{2})?",
            DateLayout::English24h => r"\d{1,2}/\d{1,2}/\d{2,4}, \d{1,2}:\d{2}(?::\d{2})?",
            DateLayout::English12h => r"\d{1,2}/\d{1,2}/\d{2,4}, \d{1,2}:\d{2} (?:AM|PM|am|pm)",
            DateLayout::English12hSeconds => {
                r"\d{1,2}/\d{1,2}/\d{2,4}, \d{1,2}:\d{2}:\d{2} (?:AM|PM|am|pm)"
            }
        }
    }

    /// chrono layouts, two-digit years first.
    fn chrono_formats(self) -> &'static [&'static str] {
        match self {
            DateLayout::German => &[
                "%d.%m.%y, %H:%M:%S",
                "%d.%m.%y, %H:%M",
                "%d.%m.%Y, %H:%M:%S",
                "%d.%m.%Y, %H:%M",
            ],
            DateLayout::English24h => &[
                "%d/%m/%y, %H:%M:%S",
                "%d/%m/%y, %H:%M",
                "%d/%m/%Y, %H:%M:%S",
                "%d/%m/%Y, %H:%M",
            ],
            DateLayout::English12h => &["%m/%d/%y, %I:%M %p", "%m/%d/%Y, %I:%M %p"],
            DateLayout::English12hSeconds => &["%m/%d/%y, %I:%M:%S %p", "%m/%d/%Y, %I:%M:%S %p"],
        }
    }
}

/// Line framing of the exporting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `<datetime> - <rest>`
    Android,
    /// `[<datetime>] <rest>`
    Ios,
}

impl Platform {
    const ALL: [Platform; 2] = [Platform::Android, Platform::Ios];

    fn wrap(self, core: &str) -> String {
        match self {
            Platform::Android => format!(r"^({}) - (.*)$", core),
            Platform::Ios => format!(r"^\[({})\] (.*)$", core),
        }
    }
}

struct Candidate {
    layout: DateLayout,
    platform: Platform,
    regex: Regex,
}

/// Layouts in the outer loop, platforms in the inner one.
static CANDIDATES: LazyLock<Vec<Candidate>> = LazyLock::new(|| {
    let mut candidates = Vec::with_capacity(DateLayout::ALL.len() * Platform::ALL.len());
    for layout in DateLayout::ALL {
        for platform in Platform::ALL {
            let regex = Regex::new(&platform.wrap(layout.pattern())).expect("Invalid line regex");
            candidates.push(Candidate {
                layout,
                platform,
                regex,
            });
        }
    }
    candidates
});

/// Optional `<sender>:` prefix, then the text.
static PAYLOAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:([^:]+):)?\s*(.*)$").expect("Invalid payload regex"));

/// `<file>.<ext> (<note>)` on a single line.
static ATTACHMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+\.[a-zA-Z0-9]{2,5})\s*(\([^\n]*\))\s*$").expect("Invalid attachment regex")
});

// =============================================================================
// Parsed output
// =============================================================================

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name inside the export, bidi marks removed.
    pub file_name: String,
    pub mime_type: &'static str,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Attachment(Attachment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// A timestamped line. `sender` is `None` for system messages.
    Message {
        timestamp: DateTime<Utc>,
        sender: Option<String>,
        payload: Payload,
    },
    /// A timestamped line whose datetime did not parse.
    InvalidTimestamp { raw: String },
    /// A line without timestamp, continuing the previous message.
    Continuation(String),
}

// =============================================================================
// LineFormat
// =============================================================================

/// The line format of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineFormat {
    index: usize,
}

impl LineFormat {
    /// Pick the first candidate that matches `line`.
    ///
    /// `line` should already be whitespace-normalized.
    pub fn detect(line: &str) -> Option<Self> {
        CANDIDATES.iter().position(|c| c.regex.is_match(line)).map(|index| {
            trace!(
                layout = ?CANDIDATES[index].layout,
                platform = ?CANDIDATES[index].platform,
                "Line format detected"
            );
            Self { index }
        })
    }

    pub fn layout(&self) -> DateLayout {
        CANDIDATES[self.index].layout
    }

    pub fn platform(&self) -> Platform {
        CANDIDATES[self.index].platform
    }

    /// Split one normalized line into its components.
    pub fn parse_line(&self, line: &str) -> ParsedLine {
        let candidate = &CANDIDATES[self.index];
        let Some(captures) = candidate.regex.captures(line) else {
            return ParsedLine::Continuation(normalize_newlines(line));
        };

        let raw_datetime = captures.get(1).map_or("", |m| m.as_str());
        let rest = captures.get(2).map_or("", |m| m.as_str());

        let Some(timestamp) = parse_datetime(candidate.layout, raw_datetime) else {
            return ParsedLine::InvalidTimestamp {
                raw: raw_datetime.to_string(),
            };
        };

        let (sender, text) = match PAYLOAD_RE.captures(rest) {
            Some(payload) => (
                payload.get(1).map(|m| m.as_str().to_string()),
                payload.get(2).map_or("", |m| m.as_str()),
            ),
            None => (None, rest),
        };

        // Attachments are only recognized on user messages.
        let payload = match sender.as_ref().and_then(|_| detect_attachment(text)) {
            Some(attachment) => Payload::Attachment(attachment),
            None => Payload::Text(normalize_newlines(text)),
        };

        trace!(?timestamp, ?sender, "Parsed line");
        ParsedLine::Message {
            timestamp,
            sender,
            payload,
        }
    }
}

fn parse_datetime(layout: DateLayout, raw: &str) -> Option<DateTime<Utc>> {
    layout
        .chrono_formats()
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

// =============================================================================
// Attachments
// =============================================================================

/// Recognize `<file>.<ext> (<note>)` and classify the file by extension.
pub fn detect_attachment(text: &str) -> Option<Attachment> {
    if text.contains('\n') {
        return None;
    }
    let captures = ATTACHMENT_RE.captures(text)?;
    let file_name = strip_bidi_marks(captures.get(1)?.as_str());
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let (mime_type, media_type) = classify_extension(&extension);

    Some(Attachment {
        file_name,
        mime_type,
        media_type,
    })
}

/// Mime type and media category for a lowercase file extension.
pub fn classify_extension(extension: &str) -> (&'static str, MediaType) {
    match extension {
        "jpg" | "jpeg" => ("image/jpeg", MediaType::Image),
        "png" => ("image/png", MediaType::Image),
        "webp" => ("image/webp", MediaType::Image),
        "gif" => ("image/gif", MediaType::Image),
        "mp4" => ("video/mp4", MediaType::Video),
        "mov" => ("video/quicktime", MediaType::Video),
        "3gp" => ("video/3gpp", MediaType::Video),
        "opus" => ("audio/opus", MediaType::Audio),
        "m4a" => ("audio/mp4", MediaType::Audio),
        "mp3" => ("audio/mpeg", MediaType::Audio),
        "wav" => ("audio/wav", MediaType::Audio),
        _ => ("application/octet-stream", MediaType::None),
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Replace exotic spaces with plain ones and drop a leading BOM.
///
/// Exports put U+202F between time and `am`/`pm`, which no layout accepts.
pub fn normalize_whitespace(line: &str) -> String {
    line.trim_start_matches('\u{FEFF}')
        .chars()
        .map(|c| match c {
            '\u{00A0}' | '\u{202F}' | '\u{2007}' => ' ',
            other => other,
        })
        .collect()
}

/// `\r\n` and lone `\r` become `\n`.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_bidi_marks(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\u{200E}' | '\u{200F}'))
        .collect()
}
