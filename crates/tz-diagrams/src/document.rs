//! Document access and presentation capabilities.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::block::SourcePosition;

/// Stable identity of a document, independent of how the host holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity for a file, canonicalized when the path exists.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Self(path.to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read access to a document's current text.
pub trait Document: Send + Sync {
    fn id(&self) -> &DocumentId;

    /// Current text, or `None` when it cannot be read.
    fn text(&self) -> Option<String>;

    /// Map a byte offset in the current text to a line/column position.
    fn position_at(&self, offset: usize) -> Option<SourcePosition> {
        self.text()
            .map(|text| SourcePosition::locate(&text, offset))
    }
}

/// Capability to make the preview redraw from current cache state.
///
/// Must be idempotent; it is called once per resolved block.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn request_refresh(&self, document: &DocumentId);
}

/// Presenter for hosts that read results only after a pass finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPresenter;

#[async_trait]
impl Presenter for NoopPresenter {
    async fn request_refresh(&self, _document: &DocumentId) {}
}

/// A Markdown file on disk, re-read on every access.
#[derive(Debug, Clone)]
pub struct FileDocument {
    id: DocumentId,
    path: PathBuf,
}

impl FileDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: DocumentId::from_path(&path),
            path,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Document for FileDocument {
    fn id(&self) -> &DocumentId {
        &self.id
    }

    fn text(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read document");
                None
            }
        }
    }
}

/// In-memory document, e.g. an unsaved editor buffer.
#[derive(Debug)]
pub struct MemoryDocument {
    id: DocumentId,
    text: RwLock<String>,
}

impl MemoryDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(id),
            text: RwLock::new(text.into()),
        }
    }

    /// Replace the buffer contents.
    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.write().unwrap_or_else(PoisonError::into_inner) = text.into();
    }
}

impl Document for MemoryDocument {
    fn id(&self) -> &DocumentId {
        &self.id
    }

    fn text(&self) -> Option<String> {
        Some(
            self.text
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        )
    }
}
