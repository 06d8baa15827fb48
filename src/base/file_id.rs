//! File identity: stable handles for source documents.
//!
//! Every analyzed document is addressed by a [`FileId`]. The [`FileSet`] owns
//! the path ↔ id mapping together with the latest text of each document and
//! a monotonically increasing modification revision, which the semantic
//! units use to decide whether a rebuild is needed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

/// Handle of a source document.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FileId(pub u32);

impl FileId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Text of a document at one modification revision.
#[derive(Clone, Debug)]
pub struct FileContents {
    pub text: Arc<str>,
    pub revision: u64,
}

/// Path ↔ [`FileId`] registry with document contents.
///
/// Ids are never reused; removing a file drops its contents but keeps the
/// id reserved so stale handles cannot alias a new document.
#[derive(Debug, Default)]
pub struct FileSet {
    inner: RwLock<FileSetInner>,
}

#[derive(Debug, Default)]
struct FileSetInner {
    path_to_id: IndexMap<PathBuf, FileId>,
    id_to_path: IndexMap<FileId, PathBuf>,
    contents: IndexMap<FileId, FileContents>,
    next_id: u32,
    next_revision: u64,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or assign the id for `path`.
    pub fn file_id(&self, path: &Path) -> FileId {
        {
            let inner = self.inner.read();
            if let Some(&id) = inner.path_to_id.get(path) {
                return id;
            }
        }

        let mut inner = self.inner.write();
        // Another thread may have won the race for the write lock.
        if let Some(&id) = inner.path_to_id.get(path) {
            return id;
        }

        let id = FileId::new(inner.next_id);
        inner.next_id += 1;
        inner.path_to_id.insert(path.to_owned(), id);
        inner.id_to_path.insert(id, path.to_owned());
        id
    }

    /// Look up an already registered path without assigning an id.
    pub fn lookup(&self, path: &Path) -> Option<FileId> {
        self.inner.read().path_to_id.get(path).copied()
    }

    pub fn path(&self, file: FileId) -> Option<PathBuf> {
        self.inner.read().id_to_path.get(&file).cloned()
    }

    /// Replace the text of `file`, returning the new modification revision.
    pub fn set_contents(&self, file: FileId, text: impl Into<Arc<str>>) -> u64 {
        let mut inner = self.inner.write();
        inner.next_revision += 1;
        let revision = inner.next_revision;
        inner.contents.insert(
            file,
            FileContents {
                text: text.into(),
                revision,
            },
        );
        revision
    }

    pub fn contents(&self, file: FileId) -> Option<FileContents> {
        self.inner.read().contents.get(&file).cloned()
    }

    /// Drop the contents of `file`. The id stays reserved for its path.
    pub fn remove_contents(&self, file: FileId) -> bool {
        self.inner.write().contents.shift_remove(&file).is_some()
    }

    /// All files that currently have contents, in registration order.
    pub fn files(&self) -> Vec<FileId> {
        self.inner.read().contents.keys().copied().collect()
    }
}
