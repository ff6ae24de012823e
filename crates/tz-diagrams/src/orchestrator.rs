//! Brings a document's diagrams up to date, one block at a time.
//!
//! [`DocumentRenderer`] is the entry point a host holds on to. A pass walks
//! the document's blocks in order and resolves each from the Memory Cache,
//! the Persistent Cache or the scheduler, nudging the [`Presenter`] after
//! every block that was not already resolved so diagrams appear as they
//! complete.
//!
//! Only one pass runs at a time. A call made while a pass is running returns
//! [`PassOutcome::Skipped`] and is not queued; nudging the preview often
//! produces a change event, and re-entering here would loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::task::JoinHandle;
use tz_cache::{CacheError, CacheStats};

use crate::block::extract_blocks;
use crate::caches::{RenderCaches, RenderResult};
use crate::document::{Document, DocumentId, Presenter};
use crate::engine::{EngineError, EngineLoader};
use crate::fingerprint::Fingerprint;
use crate::scheduler::{EngineState, RenderScheduler, SchedulerOptions};

/// Counts for one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Blocks found in the document.
    pub blocks: usize,
    /// Blocks already resolved in memory.
    pub memory_hits: usize,
    /// Blocks restored from the Persistent Cache.
    pub persistent_hits: usize,
    /// Blocks sent to the scheduler.
    pub rendered: usize,
    /// Blocks that resolved to an error during this pass.
    pub failed: usize,
}

/// Result of [`DocumentRenderer::render_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was already running.
    Skipped,
    Completed(PassReport),
}

/// Held for the duration of a pass; releases the in-flight flag on drop.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Composes extraction, both cache tiers and the scheduler.
pub struct DocumentRenderer {
    caches: Arc<RenderCaches>,
    scheduler: RenderScheduler,
    presenter: Arc<dyn Presenter>,
    in_flight: AtomicBool,
}

impl DocumentRenderer {
    /// Build a renderer and start its scheduler on the current runtime.
    pub fn spawn(
        loader: Arc<dyn EngineLoader>,
        caches: Arc<RenderCaches>,
        presenter: Arc<dyn Presenter>,
        options: SchedulerOptions,
    ) -> Self {
        let scheduler = RenderScheduler::spawn(loader, Arc::clone(&caches), options);
        Self {
            caches,
            scheduler,
            presenter,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Resolve every block in `document`.
    pub async fn render_document(&self, document: &dyn Document) -> PassOutcome {
        let Some(_guard) = PassGuard::acquire(&self.in_flight) else {
            tracing::debug!(document = %document.id(), "Pass already running, skipping");
            return PassOutcome::Skipped;
        };

        let Some(text) = document.text() else {
            return PassOutcome::Completed(PassReport::default());
        };

        let start = Instant::now();
        let blocks = extract_blocks(&text);
        let mut report = PassReport {
            blocks: blocks.len(),
            ..PassReport::default()
        };

        for block in blocks {
            if self.caches.contains(&block.fingerprint) {
                report.memory_hits += 1;
                continue;
            }

            let result = if let Some(result) = self.caches.load_persistent(&block.fingerprint) {
                tracing::debug!(fingerprint = %block.fingerprint.short(), "Persistent cache hit");
                report.persistent_hits += 1;
                result
            } else {
                report.rendered += 1;
                self.scheduler
                    .render(block.fingerprint, block.source)
                    .await
            };

            if result.is_error() {
                report.failed += 1;
            }
            self.presenter.request_refresh(document.id()).await;
        }

        if report.persistent_hits + report.rendered > 0 {
            tracing::info!(
                document = %document.id(),
                blocks = report.blocks,
                memory_hits = report.memory_hits,
                persistent_hits = report.persistent_hits,
                rendered = report.rendered,
                failed = report.failed,
                elapsed_ms = start.elapsed().as_millis(),
                "Render pass complete"
            );
        }

        PassOutcome::Completed(report)
    }

    /// Run [`render_document`](Self::render_document) in the background.
    pub fn spawn_render(self: &Arc<Self>, document: Arc<dyn Document>) -> JoinHandle<PassOutcome> {
        let renderer = Arc::clone(self);
        tokio::spawn(async move { renderer.render_document(document.as_ref()).await })
    }

    /// Forget a block's cached result and render it again.
    pub async fn retry_block(
        &self,
        fingerprint: &Fingerprint,
        source: &str,
        document: &DocumentId,
    ) -> RenderResult {
        self.caches.evict(fingerprint);
        let result = self
            .scheduler
            .render(fingerprint.clone(), source.to_owned())
            .await;
        self.presenter.request_refresh(document).await;
        result
    }

    /// Retry the block in `document` whose source has `fingerprint`.
    ///
    /// Returns `None` if no such block exists in the current text.
    pub async fn retry_in_document(
        &self,
        document: &dyn Document,
        fingerprint: &Fingerprint,
    ) -> Option<RenderResult> {
        let text = document.text()?;
        let block = extract_blocks(&text)
            .into_iter()
            .find(|block| &block.fingerprint == fingerprint)?;
        Some(
            self.retry_block(fingerprint, &block.source, document.id())
                .await,
        )
    }

    /// Synchronous Memory Cache lookup for the presentation layer.
    #[must_use]
    pub fn get_result(&self, fingerprint: &Fingerprint) -> Option<RenderResult> {
        self.caches.get(fingerprint)
    }

    /// Switch theme; returns whether anything changed.
    pub fn set_dark_mode(&self, dark_mode: bool) -> bool {
        self.caches.set_dark_mode(dark_mode)
    }

    /// Load the engine without rendering anything.
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub async fn warm_up(&self) -> Result<(), EngineError> {
        self.scheduler.warm_up().await
    }

    /// Drop the engine and all in-memory results.
    pub async fn reset_engine(&self) {
        self.scheduler.reset_engine().await;
    }

    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.scheduler.engine_state()
    }

    /// Clear both cache tiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the Persistent Cache could not be cleared.
    pub fn clear_caches(&self) -> Result<(), CacheError> {
        self.caches.clear()
    }

    /// Persistent Cache statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache index cannot be read.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        self.caches.stats()
    }

    #[must_use]
    pub fn caches(&self) -> &RenderCaches {
        &self.caches
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::document::MemoryDocument;
    use crate::scheduler::SchedulerOptions;
    use crate::testing::{StubLoader, caches_over, renderer, renderer_with};
    use pretty_assertions::assert_eq;
    use tz_cache::FileStore;

    const DRAW: &str = r"\draw (0,0) -- (1,1);";

    fn doc(text: &str) -> MemoryDocument {
        MemoryDocument::new("memory://doc.md", text)
    }

    fn fenced(sources: &[&str]) -> String {
        sources
            .iter()
            .map(|s| format!("```tikz\n{s}\n```\n"))
            .collect::<Vec<_>>()
            .join("\nSome prose.\n\n")
    }

    #[tokio::test]
    async fn test_scenario_a_single_block_populates_both_caches() {
        let loader = Arc::new(StubLoader::svg("<svg>A</svg>"));
        let (renderer, presenter) = renderer(&loader);
        let document = doc(&fenced(&[DRAW]));
        let fp = Fingerprint::of_source(DRAW);

        let outcome = renderer.render_document(&document).await;

        assert_eq!(
            outcome,
            PassOutcome::Completed(PassReport {
                blocks: 1,
                rendered: 1,
                ..PassReport::default()
            })
        );
        assert_eq!(
            renderer.get_result(&fp),
            Some(RenderResult::Artifact("<svg>A</svg>".to_owned()))
        );
        let entry = renderer
            .caches()
            .persistent()
            .get(fp.as_str())
            .unwrap()
            .unwrap();
        assert_eq!(entry.artifact, "<svg>A</svg>");
        assert_eq!(presenter.refreshes(), vec![document.id().clone()]);
    }

    #[tokio::test]
    async fn test_scenario_b_unchanged_document_renders_once() {
        let loader = Arc::new(StubLoader::svg("<svg>A</svg>"));
        let (renderer, presenter) = renderer(&loader);
        let document = doc(&fenced(&[DRAW]));

        renderer.render_document(&document).await;
        let second = renderer.render_document(&document).await;

        assert_eq!(loader.compile_count(), 1);
        assert_eq!(
            second,
            PassOutcome::Completed(PassReport {
                blocks: 1,
                memory_hits: 1,
                ..PassReport::default()
            })
        );
        // Already-resolved blocks are not nudged again
        assert_eq!(presenter.count(), 1);
    }

    #[tokio::test]
    async fn test_scenario_c_compile_error_stays_in_memory() {
        let loader = Arc::new(StubLoader::failing("! Undefined control sequence"));
        let (renderer, _presenter) = renderer(&loader);
        let document = doc(&fenced(&[r"\dwar (0,0);"]));
        let fp = Fingerprint::of_source(r"\dwar (0,0);");

        let outcome = renderer.render_document(&document).await;

        let PassOutcome::Completed(report) = outcome else {
            panic!("pass was skipped");
        };
        assert_eq!(report.failed, 1);
        let message = renderer
            .get_result(&fp)
            .and_then(|r| r.error_message().map(str::to_owned))
            .unwrap();
        assert!(message.contains("Undefined control sequence"));
        assert!(renderer.caches().persistent().get(fp.as_str()).unwrap().is_none());
        assert_eq!(renderer.stats().unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_scenario_d_identical_blocks_render_once() {
        let loader = Arc::new(StubLoader::svg("<svg>D</svg>"));
        let (renderer, _presenter) = renderer(&loader);
        let text = fenced(&[DRAW, &format!("   {DRAW}   ")]);
        let document = doc(&text);

        let blocks = extract_blocks(&text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].fingerprint, blocks[1].fingerprint);

        renderer.render_document(&document).await;

        assert_eq!(loader.compile_count(), 1);
        assert_eq!(
            renderer.get_result(&blocks[0].fingerprint),
            renderer.get_result(&blocks[1].fingerprint)
        );
    }

    #[tokio::test]
    async fn test_scenario_e_retry_replaces_error() {
        let loader = Arc::new(StubLoader::new(|_, call| {
            if call == 0 {
                Err(EngineError::Compile("! Emergency stop.".to_owned()))
            } else {
                Ok("<svg>E</svg>".to_owned())
            }
        }));
        let (renderer, presenter) = renderer(&loader);
        let document = doc(&fenced(&[DRAW]));
        let fp = Fingerprint::of_source(DRAW);

        renderer.render_document(&document).await;
        assert!(renderer.get_result(&fp).unwrap().is_error());

        let result = renderer.retry_block(&fp, DRAW, document.id()).await;

        assert_eq!(result, RenderResult::Artifact("<svg>E</svg>".to_owned()));
        assert_eq!(renderer.get_result(&fp), Some(result));
        assert!(renderer.caches().persistent().contains(fp.as_str()).unwrap());
        assert_eq!(loader.compile_count(), 2);
        assert_eq!(presenter.count(), 2);
    }

    #[tokio::test]
    async fn test_memory_hit_never_reaches_engine() {
        let loader = Arc::new(StubLoader::svg("<svg/>"));
        let (renderer, _presenter) = renderer(&loader);
        let fp = Fingerprint::of_source(DRAW);
        renderer
            .caches()
            .store_error(&fp, "earlier failure".to_owned());

        renderer.render_document(&doc(&fenced(&[DRAW, DRAW]))).await;

        assert_eq!(loader.load_count(), 0);
        assert_eq!(loader.compile_count(), 0);
    }

    #[tokio::test]
    async fn test_persistent_hit_survives_restart() {
        let temp = tempfile::tempdir().unwrap();
        let document = doc(&fenced(&[DRAW]));

        let first_loader = Arc::new(StubLoader::svg("<svg>P</svg>"));
        let (first, _) = renderer_with(
            &first_loader,
            caches_over(Box::new(FileStore::new(temp.path()).unwrap())),
            SchedulerOptions::default(),
        );
        first.render_document(&document).await;

        let second_loader = Arc::new(StubLoader::svg("<svg>unused</svg>"));
        let (second, presenter) = renderer_with(
            &second_loader,
            caches_over(Box::new(FileStore::new(temp.path()).unwrap())),
            SchedulerOptions::default(),
        );
        let outcome = second.render_document(&document).await;

        assert_eq!(
            outcome,
            PassOutcome::Completed(PassReport {
                blocks: 1,
                persistent_hits: 1,
                ..PassReport::default()
            })
        );
        assert_eq!(second_loader.compile_count(), 0);
        assert_eq!(
            second.get_result(&Fingerprint::of_source(DRAW)),
            Some(RenderResult::Artifact("<svg>P</svg>".to_owned()))
        );
        assert_eq!(presenter.count(), 1);
    }

    #[tokio::test]
    async fn test_nudges_after_every_resolved_block() {
        let loader = Arc::new(StubLoader::new(|source, _| Ok(format!("<svg>{source}</svg>"))));
        let (renderer, presenter) = renderer(&loader);

        renderer
            .render_document(&doc(&fenced(&["a", "b", "c"])))
            .await;

        assert_eq!(presenter.count(), 3);
        let sources: Vec<_> = loader.calls().into_iter().map(|c| c.source).collect();
        assert_eq!(sources, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_pass_is_skipped() {
        let loader = Arc::new(
            StubLoader::svg("<svg/>").with_compile_delay(Duration::from_secs(10)),
        );
        let (renderer, _presenter) = renderer(&loader);
        let document: Arc<dyn Document> = Arc::new(doc(&fenced(&[DRAW])));

        let running = renderer.spawn_render(Arc::clone(&document));
        while loader.started_count() == 0 {
            tokio::task::yield_now().await;
        }

        let skipped = renderer.render_document(document.as_ref()).await;
        assert_eq!(skipped, PassOutcome::Skipped);

        let completed = running.await.unwrap();
        assert!(matches!(completed, PassOutcome::Completed(r) if r.rendered == 1));

        // The flag is released once the pass finishes
        let again = renderer.render_document(document.as_ref()).await;
        assert!(matches!(again, PassOutcome::Completed(r) if r.memory_hits == 1));
    }

    #[tokio::test]
    async fn test_unreadable_document_is_empty_pass() {
        struct Unreadable(DocumentId);
        impl Document for Unreadable {
            fn id(&self) -> &DocumentId {
                &self.0
            }
            fn text(&self) -> Option<String> {
                None
            }
        }

        let loader = Arc::new(StubLoader::svg("<svg/>"));
        let (renderer, presenter) = renderer(&loader);

        let outcome = renderer
            .render_document(&Unreadable(DocumentId::new("gone")))
            .await;

        assert_eq!(outcome, PassOutcome::Completed(PassReport::default()));
        assert_eq!(presenter.count(), 0);
    }

    #[tokio::test]
    async fn test_dark_mode_change_rerenders_from_persistent() {
        let loader = Arc::new(StubLoader::svg(r#"<svg><path stroke="black"/></svg>"#));
        let (renderer, _presenter) = renderer(&loader);
        let document = doc(&fenced(&[DRAW]));
        let fp = Fingerprint::of_source(DRAW);

        renderer.render_document(&document).await;
        assert!(renderer.set_dark_mode(true));
        assert!(renderer.get_result(&fp).is_none());

        let outcome = renderer.render_document(&document).await;

        assert!(matches!(outcome, PassOutcome::Completed(r) if r.persistent_hits == 1));
        assert_eq!(loader.compile_count(), 1);
        assert_eq!(
            renderer.get_result(&fp).unwrap().artifact(),
            Some(r#"<svg><path stroke="currentColor"/></svg>"#)
        );
    }

    #[tokio::test]
    async fn test_reset_engine_clears_memory_results() {
        let loader = Arc::new(StubLoader::svg("<svg/>"));
        let (renderer, _presenter) = renderer(&loader);
        let document = doc(&fenced(&[DRAW]));

        renderer.render_document(&document).await;
        assert_eq!(renderer.engine_state(), EngineState::Ready);

        renderer.reset_engine().await;

        assert_eq!(renderer.engine_state(), EngineState::Unloaded);
        assert!(renderer.get_result(&Fingerprint::of_source(DRAW)).is_none());
    }

    #[tokio::test]
    async fn test_clear_caches_forces_rerender() {
        let loader = Arc::new(StubLoader::svg("<svg/>"));
        let (renderer, _presenter) = renderer(&loader);
        let document = doc(&fenced(&[DRAW]));

        renderer.render_document(&document).await;
        renderer.clear_caches().unwrap();
        assert_eq!(renderer.stats().unwrap().count, 0);

        renderer.render_document(&document).await;
        assert_eq!(loader.compile_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_in_document() {
        let loader = Arc::new(StubLoader::svg("<svg/>"));
        let (renderer, _presenter) = renderer(&loader);
        let document = doc(&fenced(&[DRAW]));
        let fp = Fingerprint::of_source(DRAW);

        assert!(renderer.retry_in_document(&document, &fp).await.is_some());
        assert!(
            renderer
                .retry_in_document(&document, &Fingerprint::of_source("absent"))
                .await
                .is_none()
        );
        assert_eq!(loader.compile_count(), 1);
    }
}
