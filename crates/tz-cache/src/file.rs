//! File-based store implementation.
//!
//! [`FileStore`] keeps every key as a single file directly under a root
//! directory. Keys are flat (`tikz.<fingerprint>`, `tikz.index`,
//! `tikz.version`), so the directory never nests:
//!
//! ```text
//! {root}/
//! +-- tikz.version       # schema version (JSON integer)
//! +-- tikz.index         # JSON array of fingerprints
//! +-- tikz.3f2a...       # cache entry (JSON)
//! ```
//!
//! Schema versioning lives one layer up in
//! [`PersistentCache`](crate::PersistentCache), which wipes entries through
//! this store rather than deleting the directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{CacheError, Store};

/// File-based [`Store`] rooted at a directory on disk.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "opened file store");
        Ok(Self { root })
    }

    /// Root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
            || key.contains("..")
        {
            return Err(CacheError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(key))
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Written to a hidden sibling first and renamed into place, so a crash
    /// never leaves a truncated value under `key`.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        let staging = self.root.join(format!(".{key}.tmp"));
        fs::write(&staging, value)?;
        if let Err(e) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Hidden files (staging files, `.gitignore`) are not keys.
    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = dir_entry.file_name().to_str()
                && !name.starts_with('.')
            {
                keys.push(name.to_owned());
            }
        }
        Ok(keys)
    }
}
