//! Instrumented engine and presenter stubs for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tz_cache::{MemoryStore, PersistentCache, Store};

use crate::caches::RenderCaches;
use crate::document::{DocumentId, Presenter};
use crate::engine::{CompileOptions, Engine, EngineError, EngineLoader};
use crate::orchestrator::DocumentRenderer;
use crate::scheduler::SchedulerOptions;
use crate::svg::SvgPostProcessor;

type Respond = dyn Fn(&str, usize) -> Result<String, EngineError> + Send + Sync;

/// One recorded engine call.
#[derive(Debug, Clone)]
pub(crate) struct CompileCall {
    pub source: String,
    pub options: CompileOptions,
    pub started: Instant,
    pub finished: Instant,
}

struct Shared {
    respond: Box<Respond>,
    compile_delay: Duration,
    calls: Mutex<Vec<CompileCall>>,
    started: AtomicUsize,
}

/// Loader producing engines that answer through a closure.
///
/// The closure receives the prepared source and the zero-based call index
/// across every engine this loader created.
pub(crate) struct StubLoader {
    shared: Arc<Shared>,
    load_delay: Duration,
    failing_loads: AtomicUsize,
    loads: AtomicUsize,
}

impl StubLoader {
    pub fn new(
        respond: impl Fn(&str, usize) -> Result<String, EngineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                respond: Box::new(respond),
                compile_delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
                started: AtomicUsize::new(0),
            }),
            load_delay: Duration::ZERO,
            failing_loads: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    /// Engine that always returns `svg`.
    pub fn svg(svg: &'static str) -> Self {
        Self::new(move |_, _| Ok(svg.to_owned()))
    }

    /// Engine that always fails with `message`.
    pub fn failing(message: &'static str) -> Self {
        Self::new(move |_, _| Err(EngineError::Compile(message.to_owned())))
    }

    pub fn with_compile_delay(mut self, delay: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.compile_delay = delay;
        }
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Make the next `count` loads fail.
    pub fn with_failing_loads(self, count: usize) -> Self {
        self.failing_loads.store(count, Ordering::SeqCst);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<CompileCall> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn compile_count(&self) -> usize {
        self.shared.calls.lock().unwrap().len()
    }

    /// Calls that have started, finished or not.
    pub fn started_count(&self) -> usize {
        self.shared.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLoader for StubLoader {
    async fn load(&self) -> Result<Box<dyn Engine>, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        let failing = self.failing_loads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_loads.store(failing - 1, Ordering::SeqCst);
            return Err(EngineError::Load("stub engine unavailable".to_owned()));
        }

        Ok(Box::new(StubEngine {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct StubEngine {
    shared: Arc<Shared>,
}

#[async_trait]
impl Engine for StubEngine {
    async fn compile(
        &mut self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<String, EngineError> {
        let index = self.shared.started.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        if !self.shared.compile_delay.is_zero() {
            tokio::time::sleep(self.shared.compile_delay).await;
        }
        let result = (self.shared.respond)(source, index);

        self.shared.calls.lock().unwrap().push(CompileCall {
            source: source.to_owned(),
            options: options.clone(),
            started,
            finished: Instant::now(),
        });
        result
    }
}

/// Presenter that records every nudge.
#[derive(Default)]
pub(crate) struct RecordingPresenter {
    refreshes: Mutex<Vec<DocumentId>>,
}

impl RecordingPresenter {
    pub fn count(&self) -> usize {
        self.refreshes.lock().unwrap().len()
    }

    pub fn refreshes(&self) -> Vec<DocumentId> {
        self.refreshes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn request_refresh(&self, document: &DocumentId) {
        self.refreshes.lock().unwrap().push(document.clone());
    }
}

/// Caches over an in-memory store, light theme.
pub(crate) fn memory_caches() -> Arc<RenderCaches> {
    caches_over(Box::new(MemoryStore::new()))
}

pub(crate) fn caches_over(store: Box<dyn Store>) -> Arc<RenderCaches> {
    let persistent = PersistentCache::open(store, "tikz").unwrap();
    Arc::new(RenderCaches::new(persistent, SvgPostProcessor, false))
}

/// Renderer wired to `loader`, a recording presenter and the given caches.
pub(crate) fn renderer_with(
    loader: &Arc<StubLoader>,
    caches: Arc<RenderCaches>,
    options: SchedulerOptions,
) -> (Arc<DocumentRenderer>, Arc<RecordingPresenter>) {
    let presenter = Arc::new(RecordingPresenter::default());
    let renderer = DocumentRenderer::spawn(
        Arc::clone(loader) as Arc<dyn EngineLoader>,
        caches,
        Arc::clone(&presenter) as Arc<dyn Presenter>,
        options,
    );
    (Arc::new(renderer), presenter)
}

/// Renderer over fresh in-memory caches with default options.
pub(crate) fn renderer(
    loader: &Arc<StubLoader>,
) -> (Arc<DocumentRenderer>, Arc<RecordingPresenter>) {
    renderer_with(loader, memory_caches(), SchedulerOptions::default())
}
