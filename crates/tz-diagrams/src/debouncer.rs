//! Change debouncing for documents.
//!
//! Editors emit several change events per keystroke or save. Events are
//! recorded per document with a deadline that resets on every new event;
//! a poll loop drains documents whose deadline has passed, so a burst of
//! edits yields exactly one render pass.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::document::DocumentId;

/// Kind of document change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Text changed.
    Changed,
    /// Document closed or deleted.
    Closed,
}

/// A debounced change, ready to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentChange {
    pub document: DocumentId,
    pub kind: ChangeKind,
}

struct PendingChange {
    kind: ChangeKind,
    deadline: Instant,
}

/// Thread-safe per-document debouncer.
pub struct ChangeDebouncer {
    pending: Mutex<HashMap<DocumentId, PendingChange>>,
    delay: Duration,
}

impl ChangeDebouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            delay,
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a change, pushing the document's deadline back.
    ///
    /// Safe to call from a watcher callback thread.
    pub fn record(&self, document: DocumentId, kind: ChangeKind) {
        self.record_at(document, kind, Instant::now());
    }

    fn record_at(&self, document: DocumentId, kind: ChangeKind, now: Instant) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = now + self.delay;

        match pending.entry(document) {
            Entry::Vacant(entry) => {
                entry.insert(PendingChange { kind, deadline });
            }
            Entry::Occupied(mut entry) => {
                // Latest kind wins: a reopened document is a change, a
                // closed one needs no render
                *entry.get_mut() = PendingChange { kind, deadline };
            }
        }
    }

    /// Remove and return every change whose deadline has passed.
    pub fn drain_ready(&self) -> Vec<DocumentChange> {
        self.drain_ready_at(Instant::now())
    }

    fn drain_ready_at(&self, now: Instant) -> Vec<DocumentChange> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        let ready: Vec<DocumentId> = pending
            .iter()
            .filter(|(_, change)| change.deadline <= now)
            .map(|(document, _)| document.clone())
            .collect();

        let mut changes: Vec<DocumentChange> = ready
            .into_iter()
            .filter_map(|document| {
                let change = pending.remove(&document)?;
                Some(DocumentChange {
                    document,
                    kind: change.kind,
                })
            })
            .collect();
        changes.sort_by(|a, b| a.document.cmp(&b.document));
        changes
    }

    /// Earliest pending deadline, for timer scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.values().map(|change| change.deadline).min()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
