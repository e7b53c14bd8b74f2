use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Export format a chat was imported from.
///
/// Stored as an integer tag in `chats.source`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatSource {
    /// Source not recorded (or a tag written by a newer version).
    #[default]
    Unknown,
    /// Line-oriented text export (Android / iOS messenger style).
    FormatA,
}

impl ChatSource {
    pub fn as_i64(self) -> i64 {
        match self {
            ChatSource::Unknown => 0,
            ChatSource::FormatA => 1,
        }
    }

    /// Unknown tags map to `Unknown` so that old binaries can still read rows.
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => ChatSource::FormatA,
            _ => ChatSource::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChatSource::Unknown => "unknown",
            ChatSource::FormatA => "format-a",
        }
    }
}

/// Broad media category, stored as an integer tag in `media.type`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    None,
    Image,
    Video,
    Audio,
}

impl MediaType {
    pub fn as_i64(self) -> i64 {
        match self {
            MediaType::None => 0,
            MediaType::Image => 1,
            MediaType::Video => 2,
            MediaType::Audio => 3,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => MediaType::Image,
            2 => MediaType::Video,
            3 => MediaType::Audio,
            _ => MediaType::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::None => "none",
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }
}

/// Fallback extension for mime types without a usable subtype.
pub const DEFAULT_MEDIA_EXTENSION: &str = "bin";

/// File extension used in the managed media directory for a mime type.
///
/// The extension is the mime subtype (`image/jpeg` -> `jpeg`), with any
/// parameters (`; codecs=opus`) stripped.
pub fn media_extension(mime_type: &str) -> &str {
    let subtype = match mime_type.split_once('/') {
        Some((_, subtype)) => subtype,
        None => return DEFAULT_MEDIA_EXTENSION,
    };
    let subtype = subtype.split(';').next().unwrap_or_default().trim();
    if subtype.is_empty() {
        DEFAULT_MEDIA_EXTENSION
    } else {
        subtype
    }
}
