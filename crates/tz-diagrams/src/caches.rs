//! The two cache tiers in front of the engine.
//!
//! [`RenderCaches`] pairs the process-lifetime Memory Cache (post-processed
//! results, errors included) with the [`PersistentCache`] (raw artifacts
//! only) and keeps their write paths consistent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tz_cache::{CacheEntry, CacheError, CacheStats, PersistentCache};

use crate::fingerprint::Fingerprint;
use crate::svg::{PostProcess, post_process_or_raw};

/// Outcome of resolving one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderResult {
    /// Post-processed SVG ready for display.
    Artifact(String),
    /// Readable failure message.
    Error(String),
}

impl RenderResult {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    #[must_use]
    pub fn artifact(&self) -> Option<&str> {
        match self {
            Self::Artifact(svg) => Some(svg),
            Self::Error(_) => None,
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Artifact(_) => None,
            Self::Error(message) => Some(message),
        }
    }
}

/// Memory Cache plus Persistent Cache, sharing one post-processor.
pub struct RenderCaches {
    memory: RwLock<HashMap<Fingerprint, RenderResult>>,
    persistent: PersistentCache,
    post_processor: Box<dyn PostProcess>,
    dark_mode: AtomicBool,
}

impl RenderCaches {
    pub fn new(
        persistent: PersistentCache,
        post_processor: impl PostProcess + 'static,
        dark_mode: bool,
    ) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            persistent,
            post_processor: Box::new(post_processor),
            dark_mode: AtomicBool::new(dark_mode),
        }
    }

    /// Memory Cache lookup. Never touches the Persistent Cache.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<RenderResult> {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(fingerprint)
    }

    /// Number of resolved fingerprints held in memory.
    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn dark_mode(&self) -> bool {
        self.dark_mode.load(Ordering::Acquire)
    }

    /// Switch theme. Memory results carry the old theme, so a change drops
    /// them all. Returns whether the flag changed.
    pub fn set_dark_mode(&self, dark_mode: bool) -> bool {
        // Held across the swap so no artifact can be themed with the old flag
        // and inserted after the clear
        let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
        let previous = self.dark_mode.swap(dark_mode, Ordering::AcqRel);
        if previous == dark_mode {
            return false;
        }
        memory.clear();
        drop(memory);
        tracing::info!(dark_mode, "Theme changed, memory cache cleared");
        true
    }

    /// Record a successful compile in both tiers.
    ///
    /// A failed persistent write is logged and does not affect the result.
    pub fn store_artifact(&self, fingerprint: &Fingerprint, raw: &str) -> RenderResult {
        let result = self.insert_artifact(fingerprint, raw);

        let entry = CacheEntry::new(fingerprint.as_str(), raw);
        if let Err(e) = self.persistent.set(fingerprint.as_str(), &entry) {
            tracing::warn!(fingerprint = %fingerprint.short(), error = %e, "Failed to persist artifact");
        }
        result
    }

    /// Record a failure. Errors live in memory only.
    pub fn store_error(&self, fingerprint: &Fingerprint, message: String) -> RenderResult {
        let result = RenderResult::Error(message);
        self.insert(fingerprint.clone(), result.clone());
        result
    }

    /// Promote a persistent hit into the Memory Cache.
    ///
    /// A read failure counts as a miss.
    pub fn load_persistent(&self, fingerprint: &Fingerprint) -> Option<RenderResult> {
        let entry = match self.persistent.get(fingerprint.as_str()) {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint.short(), error = %e, "Persistent cache read failed");
                return None;
            }
        };

        Some(self.insert_artifact(fingerprint, &entry.artifact))
    }

    /// Remove one fingerprint from both tiers.
    pub fn evict(&self, fingerprint: &Fingerprint) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fingerprint);
        if let Err(e) = self.persistent.invalidate(fingerprint.as_str()) {
            tracing::warn!(fingerprint = %fingerprint.short(), error = %e, "Failed to invalidate persistent entry");
        }
    }

    pub fn clear_memory(&self) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Clear both tiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the Persistent Cache could not be cleared.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.clear_memory();
        self.persistent.clear()
    }

    /// Persistent Cache statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        self.persistent.stats()
    }

    #[must_use]
    pub fn persistent(&self) -> &PersistentCache {
        &self.persistent
    }

    /// Post-process `raw` for the current theme and cache it.
    ///
    /// The theme is read under the memory write lock, which
    /// [`set_dark_mode`](Self::set_dark_mode) also takes.
    fn insert_artifact(&self, fingerprint: &Fingerprint, raw: &str) -> RenderResult {
        let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
        let svg = post_process_or_raw(self.post_processor.as_ref(), raw, self.dark_mode());
        let result = RenderResult::Artifact(svg);
        memory.insert(fingerprint.clone(), result.clone());
        result
    }

    fn insert(&self, fingerprint: Fingerprint, result: RenderResult) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fingerprint, result);
    }
}
