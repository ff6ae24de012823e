//! Persistent artifact cache for tz.
//!
//! This crate decouples the rendered-diagram cache from the underlying storage
//! mechanism. Two layers form the API:
//!
//! - [`Store`]: raw key-value storage of bytes
//! - [`PersistentCache`]: content-addressed artifact cache built on a store,
//!   with an index, access counting and schema versioning
//!
//! # Implementations
//!
//! - [`NullStore`]: No-op store (always miss), used when caching is disabled
//! - [`MemoryStore`]: In-process map, used for tests and ephemeral sessions
//! - [`FileStore`]: One file per key under a root directory
//!
//! # Example
//!
//! ```
//! use tz_cache::{CacheEntry, MemoryStore, PersistentCache};
//!
//! let cache = PersistentCache::open(Box::new(MemoryStore::new()), "tikz").unwrap();
//! cache.set("abc", &CacheEntry::new("abc", "<svg/>")).unwrap();
//! let entry = cache.get("abc").unwrap().unwrap();
//! assert_eq!(entry.artifact, "<svg/>");
//! assert_eq!(entry.access_count, 1);
//! ```

mod artifact;
mod error;
mod ext;
mod file;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub use artifact::{
    CACHE_SCHEME_VERSION, CacheEntry, CacheStats, ENTRY_OVERHEAD_BYTES, PersistentCache,
};
pub use error::CacheError;
pub use ext::StoreExt;
pub use file::FileStore;

/// Raw key-value storage for the persistent cache.
///
/// Keys are flat strings such as `tikz.<fingerprint>`; values are opaque
/// bytes. Unlike a best-effort cache bucket, every operation reports I/O
/// failures so callers can decide whether to propagate or log them.
pub trait Store: Send + Sync {
    /// Retrieve the value stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Every key currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>, CacheError>;
}

/// No-op [`Store`] that never stores or retrieves data.
///
/// Every `get` returns `None`; every `set` is silently discarded.
/// Use when caching is disabled.
pub struct NullStore;

impl Store for NullStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &[u8]) -> Result<(), CacheError> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(Vec::new())
    }
}

/// In-process [`Store`] backed by a hash map.
///
/// Contents live as long as the store itself.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of raw keys currently stored (entries, index and version).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no keys at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_store_always_misses() {
        let store = NullStore;

        assert_eq!(store.get("key").unwrap(), None);

        // Setting a value and reading it back still returns None
        store.set("key", b"hello").unwrap();
        assert_eq!(store.get("key").unwrap(), None);
        store.remove("key").unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("tikz.a", b"first").unwrap();
        store.set("tikz.b", b"second").unwrap();
        assert_eq!(store.get("tikz.a").unwrap(), Some(b"first".to_vec()));
        assert_eq!(store.len(), 2);

        store.remove("tikz.a").unwrap();
        assert_eq!(store.get("tikz.a").unwrap(), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.keys().unwrap(), vec!["tikz.b".to_owned()]);
    }

    #[test]
    fn test_memory_store_remove_absent_key() {
        let store = MemoryStore::new();
        store.remove("missing").unwrap();
        assert!(store.is_empty());
    }
}
