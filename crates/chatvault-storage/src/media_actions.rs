//! Deferred filesystem operations on media files.
//!
//! Media rows are written inside the commit transaction; the files they
//! describe are only copied, moved or deleted once the commit is durable.
//! Actions are never persisted: anything still queued when the process
//! exits is lost.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use chatvault_core::error::VaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaActionKind {
    Copy,
    Move,
    Delete,
}

impl MediaActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaActionKind::Copy => "copy",
            MediaActionKind::Move => "move",
            MediaActionKind::Delete => "delete",
        }
    }
}

/// One queued operation.
///
/// `source` is relative to the import root given at execution time,
/// `destination` relative to the managed media directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAction {
    pub kind: MediaActionKind,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl MediaAction {
    pub fn copy(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            kind: MediaActionKind::Copy,
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn relocate(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            kind: MediaActionKind::Move,
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn delete(source: impl Into<PathBuf>) -> Self {
        Self {
            kind: MediaActionKind::Delete,
            source: source.into(),
            destination: PathBuf::new(),
        }
    }

    fn run(&self, import_root: &Path, media_dir: &Path) -> io::Result<()> {
        confine(&self.source)?;
        if self.kind != MediaActionKind::Delete {
            confine(&self.destination)?;
        }

        let source = import_root.join(&self.source);
        match self.kind {
            MediaActionKind::Copy => {
                std::fs::copy(&source, media_dir.join(&self.destination)).map(|_| ())
            }
            MediaActionKind::Move => std::fs::rename(&source, media_dir.join(&self.destination)),
            MediaActionKind::Delete => std::fs::remove_file(&source),
        }
    }
}

/// True if `path` is a non-empty relative path that cannot leave the
/// directory it is joined to: no root, prefix or `..` components.
pub fn is_confined_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn confine(path: &Path) -> io::Result<()> {
    if is_confined_relative(path) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path escapes its base directory: {}", path.display()),
        ))
    }
}

/// Outcome counts of one queue execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl ActionReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Default)]
pub struct MediaActionQueue {
    actions: Vec<MediaAction>,
}

impl MediaActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: MediaAction) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[MediaAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drop every queued action without running it.
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Run every queued action once, then empty the queue.
    ///
    /// Failures are logged and counted, never returned.
    pub fn execute(&mut self, import_root: &Path, media_dir: &Path) -> ActionReport {
        let mut report = ActionReport::default();
        if self.actions.is_empty() {
            return report;
        }

        if let Err(e) = std::fs::create_dir_all(media_dir) {
            warn!(
                media_dir = %media_dir.display(),
                error = %e,
                "Failed to create media directory"
            );
        }

        for action in self.actions.drain(..) {
            match action.run(import_root, media_dir) {
                Ok(()) => {
                    debug!(
                        kind = action.kind.as_str(),
                        source = %action.source.display(),
                        destination = %action.destination.display(),
                        "Media action done"
                    );
                    report.succeeded += 1;
                }
                Err(e) => {
                    let err = VaultError::MediaAction(format!(
                        "{} {}: {}",
                        action.kind.as_str(),
                        action.source.display(),
                        e
                    ));
                    warn!(
                        kind = action.kind.as_str(),
                        source = %action.source.display(),
                        destination = %action.destination.display(),
                        "{}",
                        err
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}
