//! Error types for export import.

use chatvault_core::error::VaultError;

/// Errors from reading and parsing an export.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The first line matched none of the known line formats.
    #[error("unsupported export format, first line: {0:?}")]
    UnsupportedFormat(String),
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
    /// The working set refused an entity built from the export.
    #[error(transparent)]
    WorkingSet(#[from] VaultError),
}

impl From<ImportError> for VaultError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Io(e) => VaultError::Io(e),
            ImportError::WorkingSet(e) => e,
            other => VaultError::Parse(other.to_string()),
        }
    }
}
