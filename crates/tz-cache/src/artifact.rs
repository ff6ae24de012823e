//! Content-addressed artifact cache with an index and schema versioning.
//!
//! [`PersistentCache`] maps a diagram fingerprint to the raw SVG the engine
//! produced for it. Everything is stored through a [`Store`] under three kinds
//! of keys:
//!
//! ```text
//! {prefix}.{fingerprint}   -> CacheEntry (JSON)
//! {prefix}.index           -> ["<fingerprint>", ...]
//! {prefix}.version         -> schema version (integer)
//! ```
//!
//! The index is kept strictly in sync with entry presence and is only used
//! for enumeration (stats, bulk clear). There is no eviction policy: entries
//! live until they are invalidated or the cache is cleared.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CacheError, Store, StoreExt};

/// Current fingerprinting scheme version.
///
/// Bump when the fingerprint derivation changes (e.g. a normalization fix) so
/// entries keyed under the old scheme are wiped on the next start.
pub const CACHE_SCHEME_VERSION: u32 = 2;

/// Fixed per-entry overhead used when estimating total cache size.
pub const ENTRY_OVERHEAD_BYTES: u64 = 200;

/// A rendered artifact stored in the persistent cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Content fingerprint of the diagram source.
    pub fingerprint: String,
    /// Raw rendered SVG, before any post-processing.
    pub artifact: String,
    /// When the entry was first created.
    pub created_at: DateTime<Utc>,
    /// Number of successful retrievals.
    pub access_count: u64,
}

impl CacheEntry {
    /// Create a fresh entry stamped with the current time.
    #[must_use]
    pub fn new(fingerprint: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            artifact: artifact.into(),
            created_at: Utc::now(),
            access_count: 0,
        }
    }

    fn approximate_size(&self) -> u64 {
        self.artifact.len() as u64 + ENTRY_OVERHEAD_BYTES
    }
}

/// Aggregate statistics for user-facing reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached artifacts.
    pub count: usize,
    /// Sum of artifact lengths plus a fixed overhead per entry, in bytes.
    pub approximate_total_size: u64,
}

/// Durable fingerprint → artifact cache.
///
/// Read-modify-write sequences (index maintenance, access counting) are
/// serialized through an internal lock, so a single instance can be shared
/// across tasks and threads.
pub struct PersistentCache {
    store: Box<dyn Store>,
    prefix: String,
    lock: Mutex<()>,
}

impl PersistentCache {
    /// Open a cache on `store`, migrating the schema if needed.
    ///
    /// If the stored version is missing or older than
    /// [`CACHE_SCHEME_VERSION`], every indexed entry is removed and the
    /// version is bumped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn open(store: Box<dyn Store>, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let cache = Self {
            store,
            prefix: prefix.into(),
            lock: Mutex::new(()),
        };
        cache.migrate(CACHE_SCHEME_VERSION)?;
        Ok(cache)
    }

    /// Key prefix shared by every key this cache writes.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fetch an entry, incrementing and persisting its access count.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the entry is corrupt.
    pub fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheError> {
        let _guard = self.guard();
        let key = self.entry_key(fingerprint);
        let Some(mut entry) = self.store.get_json::<CacheEntry>(&key)? else {
            return Ok(None);
        };
        entry.access_count += 1;
        self.store.set_json(&key, &entry)?;
        Ok(Some(entry))
    }

    /// Whether an entry exists, without touching its access count.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn contains(&self, fingerprint: &str) -> Result<bool, CacheError> {
        Ok(self.store.get(&self.entry_key(fingerprint))?.is_some())
    }

    /// Insert or replace the entry for `fingerprint`.
    ///
    /// The index gains `fingerprint` only if it is not already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn set(&self, fingerprint: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let _guard = self.guard();
        self.store.set_json(&self.entry_key(fingerprint), entry)?;

        let mut index = self.read_index()?;
        if !index.iter().any(|fp| fp == fingerprint) {
            index.push(fingerprint.to_owned());
            self.write_index(&index)?;
        }
        Ok(())
    }

    /// Remove the entry for `fingerprint` and drop it from the index.
    ///
    /// Invalidating an absent fingerprint is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn invalidate(&self, fingerprint: &str) -> Result<(), CacheError> {
        let _guard = self.guard();
        let mut index = self.read_index()?;
        let before = index.len();
        index.retain(|fp| fp != fingerprint);

        self.store.remove(&self.entry_key(fingerprint))?;
        if index.len() != before {
            self.write_index(&index)?;
        }
        Ok(())
    }

    /// Remove every indexed entry, then empty the index.
    ///
    /// Removal is sequential. If it fails part way, the index is rewritten
    /// with the fingerprints that are still present before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.guard();
        self.clear_locked()
    }

    /// Count entries and estimate their total size.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or an entry is corrupt.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let _guard = self.guard();
        let index = self.read_index()?;
        let mut approximate_total_size = 0;
        for fingerprint in &index {
            if let Some(entry) = self
                .store
                .get_json::<CacheEntry>(&self.entry_key(fingerprint))?
            {
                approximate_total_size += entry.approximate_size();
            }
        }
        Ok(CacheStats {
            count: index.len(),
            approximate_total_size,
        })
    }

    /// All indexed fingerprints, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn fingerprints(&self) -> Result<Vec<String>, CacheError> {
        let _guard = self.guard();
        self.read_index()
    }

    /// All indexed entries, in insertion order, without bumping access counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or an entry is corrupt.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let _guard = self.guard();
        let mut entries = Vec::new();
        for fingerprint in self.read_index()? {
            if let Some(entry) = self.store.get_json(&self.entry_key(&fingerprint))? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Wipe the cache if the stored version is older than `current`.
    fn migrate(&self, current: u32) -> Result<(), CacheError> {
        let _guard = self.guard();
        let version_key = self.version_key();
        let stored: u32 = match self.store.get_json(&version_key) {
            Ok(stored) => stored.unwrap_or(0),
            Err(CacheError::Json(e)) => {
                tracing::warn!(error = %e, "cache version unreadable, treating as outdated");
                0
            }
            Err(e) => return Err(e),
        };
        if stored >= current {
            tracing::debug!(version = stored, "cache version up to date");
            return Ok(());
        }

        tracing::info!(stored, current, "cache scheme changed, wiping cache");
        self.clear_locked()?;
        self.store.set_json(&version_key, &current)
    }

    fn clear_locked(&self) -> Result<(), CacheError> {
        let mut remaining = self.read_index()?;
        while let Some(fingerprint) = remaining.first() {
            if let Err(e) = self.store.remove(&self.entry_key(fingerprint)) {
                self.write_index(&remaining)?;
                return Err(e);
            }
            remaining.remove(0);
        }
        self.write_index(&remaining)
    }

    /// Read the index, rebuilding it from the stored keys if it is corrupt.
    fn read_index(&self) -> Result<Vec<String>, CacheError> {
        match self.store.get_json(&self.index_key()) {
            Ok(index) => Ok(index.unwrap_or_default()),
            Err(CacheError::Json(e)) => {
                tracing::warn!(error = %e, "cache index unreadable, rebuilding from stored keys");
                let index = self.scan_entries()?;
                self.write_index(&index)?;
                Ok(index)
            }
            Err(e) => Err(e),
        }
    }

    /// Fingerprints of every entry key in the store, sorted.
    fn scan_entries(&self) -> Result<Vec<String>, CacheError> {
        let index_key = self.index_key();
        let version_key = self.version_key();
        let entry_prefix = format!("{}.", self.prefix);

        let mut fingerprints: Vec<String> = self
            .store
            .keys()?
            .into_iter()
            .filter(|key| *key != index_key && *key != version_key)
            .filter_map(|key| key.strip_prefix(&entry_prefix).map(str::to_owned))
            .collect();
        fingerprints.sort();
        Ok(fingerprints)
    }

    fn write_index(&self, index: &[String]) -> Result<(), CacheError> {
        self.store.set_json(&self.index_key(), index)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_key(&self, fingerprint: &str) -> String {
        format!("{}.{fingerprint}", self.prefix)
    }

    fn index_key(&self) -> String {
        format!("{}.index", self.prefix)
    }

    fn version_key(&self) -> String {
        format!("{}.version", self.prefix)
    }
}
