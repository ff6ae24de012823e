//! Single-flight render queue.
//!
//! All engine work goes through one worker task that owns the engine. Jobs
//! arrive over an unbounded channel and are served strictly in arrival
//! order; each carries a oneshot sender for its reply. As a result:
//!
//! - at most one engine call is ever in flight
//! - a load requested while another is pending waits behind it and finds
//!   the engine ready
//! - a job whose fingerprint was resolved while it sat in the queue is
//!   answered from the Memory Cache
//!
//! The worker exits once every [`RenderScheduler`] handle is dropped and the
//! queue is drained.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::caches::{RenderCaches, RenderResult};
use crate::consts::{DEFAULT_MAX_PGFPLOTS_COMPAT, DEFAULT_TIMEOUT};
use crate::engine::{Engine, EngineError, EngineLoader, describe_failure};
use crate::fingerprint::Fingerprint;
use crate::prepare::prepare_source;

/// Message used when the worker is gone.
const QUEUE_CLOSED: &str = "render queue is closed";

/// Lifecycle of the engine owned by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready,
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// How long to wait for one engine call.
    pub timeout: Duration,
    /// Highest `pgfplots` compat level passed to the engine.
    pub max_pgfplots_compat: String,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_pgfplots_compat: DEFAULT_MAX_PGFPLOTS_COMPAT.to_owned(),
        }
    }
}

/// Fixed message for a render that exceeded its timeout.
#[must_use]
pub fn timeout_message(timeout: Duration) -> String {
    format!(
        "Rendering timed out after {} seconds",
        timeout.as_secs_f64()
    )
}

enum Job {
    Render {
        fingerprint: Fingerprint,
        source: String,
        reply: oneshot::Sender<RenderResult>,
    },
    WarmUp {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the render worker.
#[derive(Clone)]
pub struct RenderScheduler {
    jobs: mpsc::UnboundedSender<Job>,
    state: watch::Receiver<EngineState>,
}

impl RenderScheduler {
    /// Start the worker on the current tokio runtime.
    ///
    /// The engine is not loaded until the first render or [`warm_up`].
    ///
    /// [`warm_up`]: Self::warm_up
    pub fn spawn(
        loader: Arc<dyn EngineLoader>,
        caches: Arc<RenderCaches>,
        options: SchedulerOptions,
    ) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(EngineState::Unloaded);

        let worker = Worker {
            loader,
            caches,
            options,
            engine: None,
            state: state_tx,
        };
        tokio::spawn(worker.run(rx));

        Self { jobs, state }
    }

    /// Queue a render and wait for its result.
    ///
    /// Never fails: engine problems come back as [`RenderResult::Error`].
    pub async fn render(&self, fingerprint: Fingerprint, source: String) -> RenderResult {
        let (reply, rx) = oneshot::channel();
        let job = Job::Render {
            fingerprint,
            source,
            reply,
        };
        if self.jobs.send(job).is_err() {
            return RenderResult::Error(QUEUE_CLOSED.to_owned());
        }
        rx.await
            .unwrap_or_else(|_| RenderResult::Error(QUEUE_CLOSED.to_owned()))
    }

    /// Load the engine ahead of the first render.
    ///
    /// # Errors
    ///
    /// Returns the loader's error; the engine stays unloaded.
    pub async fn warm_up(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        if self.jobs.send(Job::WarmUp { reply }).is_err() {
            return Err(EngineError::Load(QUEUE_CLOSED.to_owned()));
        }
        rx.await
            .unwrap_or_else(|_| Err(EngineError::Load(QUEUE_CLOSED.to_owned())))
    }

    /// Drop the engine and every Memory Cache result.
    ///
    /// Runs in queue order, after any render already queued.
    pub async fn reset_engine(&self) {
        let (reply, rx) = oneshot::channel();
        if self.jobs.send(Job::Reset { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Watch engine state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }
}

struct Worker {
    loader: Arc<dyn EngineLoader>,
    caches: Arc<RenderCaches>,
    options: SchedulerOptions,
    engine: Option<Box<dyn Engine>>,
    state: watch::Sender<EngineState>,
}

impl Worker {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            match job {
                Job::Render {
                    fingerprint,
                    source,
                    reply,
                } => {
                    let result = self.render(&fingerprint, &source).await;
                    let _ = reply.send(result);
                }
                Job::WarmUp { reply } => {
                    let _ = reply.send(self.ensure_loaded().await);
                }
                Job::Reset { reply } => {
                    self.reset();
                    let _ = reply.send(());
                }
            }
        }
        tracing::debug!("Render queue closed, worker exiting");
    }

    async fn ensure_loaded(&mut self) -> Result<(), EngineError> {
        if self.engine.is_some() {
            return Ok(());
        }

        self.state.send_replace(EngineState::Loading);
        match self.loader.load().await {
            Ok(engine) => {
                self.engine = Some(engine);
                self.state.send_replace(EngineState::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Engine failed to load");
                self.state.send_replace(EngineState::Unloaded);
                Err(e)
            }
        }
    }

    async fn render(&mut self, fingerprint: &Fingerprint, source: &str) -> RenderResult {
        if let Some(result) = self.caches.get(fingerprint) {
            tracing::debug!(fingerprint = %fingerprint.short(), "Resolved while queued");
            return result;
        }

        if let Err(e) = self.ensure_loaded().await {
            return self.caches.store_error(fingerprint, describe_failure(&e));
        }
        let Some(engine) = self.engine.as_mut() else {
            return self
                .caches
                .store_error(fingerprint, "engine unavailable".to_owned());
        };

        let prepared = prepare_source(source, &self.options.max_pgfplots_compat);
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            self.options.timeout,
            engine.compile(&prepared.body, &prepared.options),
        )
        .await;

        match outcome {
            Ok(Ok(svg)) => {
                tracing::debug!(
                    fingerprint = %fingerprint.short(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Rendered diagram"
                );
                self.caches.store_artifact(fingerprint, &svg)
            }
            Ok(Err(e)) => {
                tracing::debug!(fingerprint = %fingerprint.short(), error = %e, "Render failed");
                self.caches.store_error(fingerprint, describe_failure(&e))
            }
            Err(_) => {
                tracing::warn!(
                    fingerprint = %fingerprint.short(),
                    timeout_secs = self.options.timeout.as_secs(),
                    "Render timed out"
                );
                self.caches
                    .store_error(fingerprint, timeout_message(self.options.timeout))
            }
        }
    }

    fn reset(&mut self) {
        self.engine = None;
        self.caches.clear_memory();
        self.state.send_replace(EngineState::Unloaded);
        tracing::info!("Engine reset, memory cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubLoader, memory_caches};
    use pretty_assertions::assert_eq;

    fn scheduler(loader: &Arc<StubLoader>, caches: &Arc<RenderCaches>) -> RenderScheduler {
        RenderScheduler::spawn(
            Arc::clone(loader) as Arc<dyn EngineLoader>,
            Arc::clone(caches),
            SchedulerOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_calls_never_overlap() {
        let loader = Arc::new(
            StubLoader::new(|source, _| Ok(format!("<svg>{source}</svg>")))
                .with_compile_delay(Duration::from_millis(50)),
        );
        let caches = memory_caches();
        let scheduler = scheduler(&loader, &caches);

        let (a, b) = tokio::join!(
            scheduler.render(Fingerprint::of_source("a"), "a".to_owned()),
            scheduler.render(Fingerprint::of_source("b"), "b".to_owned()),
        );

        assert_eq!(a, RenderResult::Artifact("<svg>a</svg>".to_owned()));
        assert_eq!(b, RenderResult::Artifact("<svg>b</svg>".to_owned()));

        let calls = loader.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].source, "a");
        assert!(calls[0].finished <= calls[1].started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_load() {
        let loader = Arc::new(
            StubLoader::svg("<svg/>").with_load_delay(Duration::from_millis(100)),
        );
        let caches = memory_caches();
        let scheduler = scheduler(&loader, &caches);
        assert_eq!(scheduler.engine_state(), EngineState::Unloaded);

        let (a, b) = tokio::join!(
            scheduler.render(Fingerprint::of_source("a"), "a".to_owned()),
            scheduler.render(Fingerprint::of_source("b"), "b".to_owned()),
        );

        assert!(!a.is_error());
        assert!(!b.is_error());
        assert_eq!(loader.load_count(), 1);
        assert_eq!(scheduler.engine_state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn test_queued_duplicate_is_answered_from_memory() {
        let loader = Arc::new(StubLoader::svg("<svg>A</svg>"));
        let caches = memory_caches();
        let scheduler = scheduler(&loader, &caches);
        let fp = Fingerprint::of_source("same");

        let (a, b) = tokio::join!(
            scheduler.render(fp.clone(), "same".to_owned()),
            scheduler.render(fp.clone(), "same".to_owned()),
        );

        assert_eq!(a, b);
        assert_eq!(loader.compile_count(), 1);
    }

    #[tokio::test]
    async fn test_load_failure_returns_to_unloaded_and_retries() {
        let loader = Arc::new(StubLoader::svg("<svg/>").with_failing_loads(1));
        let caches = memory_caches();
        let scheduler = scheduler(&loader, &caches);

        let first = scheduler
            .render(Fingerprint::of_source("a"), "a".to_owned())
            .await;
        assert!(
            first
                .error_message()
                .is_some_and(|m| m.contains("stub engine unavailable"))
        );
        assert_eq!(scheduler.engine_state(), EngineState::Unloaded);

        let second = scheduler
            .render(Fingerprint::of_source("b"), "b".to_owned())
            .await;
        assert!(!second.is_error());
        assert_eq!(loader.load_count(), 2);
        assert_eq!(scheduler.engine_state(), EngineState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_error_and_skips_persistence() {
        let loader = Arc::new(
            StubLoader::svg("<svg/>").with_compile_delay(Duration::from_secs(120)),
        );
        let caches = memory_caches();
        let scheduler = RenderScheduler::spawn(
            Arc::clone(&loader) as Arc<dyn EngineLoader>,
            Arc::clone(&caches),
            SchedulerOptions {
                timeout: Duration::from_secs(5),
                ..SchedulerOptions::default()
            },
        );
        let fp = Fingerprint::of_source("slow");

        let result = scheduler.render(fp.clone(), "slow".to_owned()).await;

        assert_eq!(
            result,
            RenderResult::Error(timeout_message(Duration::from_secs(5)))
        );
        assert_eq!(caches.get(&fp), Some(result));
        assert!(!caches.persistent().contains(fp.as_str()).unwrap());
    }

    #[tokio::test]
    async fn test_compile_error_is_described() {
        let loader = Arc::new(StubLoader::failing(
            "This is TeX\n! Undefined control sequence.\nl.3 \\dwar\nmore noise",
        ));
        let caches = memory_caches();
        let scheduler = scheduler(&loader, &caches);

        let result = scheduler
            .render(Fingerprint::of_source("x"), "x".to_owned())
            .await;

        assert_eq!(
            result.error_message(),
            Some("! Undefined control sequence.\nl.3 \\dwar")
        );
    }

    #[tokio::test]
    async fn test_source_is_prepared_before_compile() {
        let loader = Arc::new(StubLoader::svg("<svg/>"));
        let caches = memory_caches();
        let scheduler = scheduler(&loader, &caches);
        let source = "  \\usetikzlibrary{calc}\n\n  \\draw (0,0);\n";

        scheduler
            .render(Fingerprint::of_source(source), source.to_owned())
            .await;

        let calls = loader.calls();
        assert_eq!(calls[0].source, "\\draw (0,0);");
        assert_eq!(calls[0].options.libraries, vec!["calc"]);
    }

    #[tokio::test]
    async fn test_warm_up_and_reset() {
        let loader = Arc::new(StubLoader::svg("<svg/>"));
        let caches = memory_caches();
        let scheduler = scheduler(&loader, &caches);

        scheduler.warm_up().await.unwrap();
        assert_eq!(scheduler.engine_state(), EngineState::Ready);

        let fp = Fingerprint::of_source("a");
        scheduler.render(fp.clone(), "a".to_owned()).await;
        assert!(caches.contains(&fp));

        scheduler.reset_engine().await;
        assert_eq!(scheduler.engine_state(), EngineState::Unloaded);
        assert!(!caches.contains(&fp));
        assert!(caches.persistent().contains(fp.as_str()).unwrap());

        // Next render loads a fresh engine
        scheduler.render(fp, "a".to_owned()).await;
        assert_eq!(loader.load_count(), 2);
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let loader = Arc::new(StubLoader::svg("<svg/>"));
        let caches = memory_caches();
        let scheduler = scheduler(&loader, &caches);
        let mut states = scheduler.subscribe();

        scheduler.warm_up().await.unwrap();

        let state = *states.wait_for(|s| *s == EngineState::Ready).await.unwrap();
        assert_eq!(state, EngineState::Ready);
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            timeout_message(Duration::from_secs(30)),
            "Rendering timed out after 30 seconds"
        );
    }
}
