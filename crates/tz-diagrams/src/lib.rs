//! TikZ diagram rendering for live Markdown previews.
//!
//! This crate keeps the diagrams of an open document up to date:
//! - Fenced `tikz` blocks are extracted and identified by a content fingerprint
//! - A single worker serializes all calls into a stateful rendering engine
//! - Results live in a Memory Cache in front of a durable [`PersistentCache`]
//! - The presentation layer is nudged after every block that resolves
//!
//! # Architecture
//!
//! - [`Fingerprint`], [`extract_blocks`]: block identity and extraction
//! - [`prepare_source`]: normalization and directive lifting before compile
//! - [`Engine`], [`EngineLoader`], [`KrokiLoader`]: the rendering engine seam
//! - [`RenderCaches`]: Memory Cache plus Persistent Cache
//! - [`RenderScheduler`]: single-flight render queue with engine lifecycle
//! - [`DocumentRenderer`]: per-document render passes and retry
//! - [`ChangeDebouncer`]: coalesces change events into one pass
//! - [`embed_preview`]: swaps fences for rendered figures
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tz_cache::{MemoryStore, PersistentCache};
//! use tz_diagrams::{
//!     DocumentRenderer, KrokiLoader, MemoryDocument, NoopPresenter, RenderCaches,
//!     SchedulerOptions, SvgPostProcessor,
//! };
//!
//! let persistent = PersistentCache::open(Box::new(MemoryStore::new()), "tikz")?;
//! let caches = Arc::new(RenderCaches::new(persistent, SvgPostProcessor, false));
//! let renderer = DocumentRenderer::spawn(
//!     Arc::new(KrokiLoader::new("https://kroki.io", SchedulerOptions::default().timeout)),
//!     caches,
//!     Arc::new(NoopPresenter),
//!     SchedulerOptions::default(),
//! );
//!
//! let doc = MemoryDocument::new("buffer://1", "```tikz\n\\draw (0,0) -- (1,1);\n```");
//! renderer.render_document(&doc).await;
//! ```
//!
//! [`PersistentCache`]: tz_cache::PersistentCache

mod block;
mod caches;
mod consts;
mod debouncer;
mod document;
mod engine;
mod fingerprint;
mod orchestrator;
mod prepare;
mod preview;
mod scheduler;
mod svg;

#[cfg(test)]
mod testing;

pub use block::{Block, SourcePosition, extract_blocks};
pub use caches::{RenderCaches, RenderResult};
pub use consts::{
    DEFAULT_DEBOUNCE, DEFAULT_MAX_PGFPLOTS_COMPAT, DEFAULT_TIMEOUT, TIKZ_FENCE_TAG,
};
pub use debouncer::{ChangeDebouncer, ChangeKind, DocumentChange};
pub use document::{
    Document, DocumentId, FileDocument, MemoryDocument, NoopPresenter, Presenter,
};
pub use engine::{
    CompileOptions, Engine, EngineError, EngineLoader, KrokiEngine, KrokiLoader,
    describe_failure, standalone_document,
};
pub use fingerprint::{Fingerprint, ParseFingerprintError};
pub use orchestrator::{DocumentRenderer, PassOutcome, PassReport};
pub use prepare::{PreparedSource, clamp_pgfplots_compat, normalize, prepare_source};
pub use preview::{Preview, embed_preview, escape_html};
pub use scheduler::{EngineState, RenderScheduler, SchedulerOptions, timeout_message};
pub use svg::{DARK_BACKGROUND, PostProcess, PostProcessError, SvgPostProcessor, post_process_or_raw};
