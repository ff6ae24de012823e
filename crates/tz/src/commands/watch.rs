//! `tz watch` command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tz_diagrams::{
    ChangeDebouncer, ChangeKind, Document, DocumentId, DocumentRenderer, FileDocument, PassOutcome,
};

use crate::context::{CommonArgs, build_caches, build_renderer, resolve_document};
use crate::error::CliError;
use crate::output::Output;
use crate::preview::{HtmlPresenter, default_output, write_preview};

use super::report_pass;

/// How often the debouncer is polled for settled changes.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Arguments for the watch command.
#[derive(Args)]
pub(crate) struct WatchArgs {
    /// Markdown file to watch.
    file: PathBuf,

    /// Output HTML file (default: input path with `.html` extension).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Quiet period after the last change before re-rendering, in
    /// milliseconds (overrides config).
    #[arg(long)]
    debounce_ms: Option<u64>,

    #[command(flatten)]
    common: CommonArgs,
}

/// Everything a background pass needs.
struct Session {
    renderer: Arc<DocumentRenderer>,
    document: FileDocument,
    target: PathBuf,
}

impl Session {
    async fn run_pass(&self) -> PassOutcome {
        let outcome = self.renderer.render_document(&self.document).await;
        if outcome != PassOutcome::Skipped
            && let Err(e) = write_preview(self.document.path(), &self.target, self.renderer.caches())
        {
            tracing::warn!(error = %e, "Failed to write preview");
        }
        outcome
    }
}

impl WatchArgs {
    /// Execute the watch command.
    ///
    /// Runs until interrupted with Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the file watcher cannot be
    /// created.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = self.common.load_config(self.debounce_ms)?;

        let source = resolve_document(&self.file)?;
        let target = self.output.unwrap_or_else(|| default_output(&source));

        let caches = build_caches(&config)?;
        let presenter = Arc::new(HtmlPresenter::new(
            Arc::clone(&caches),
            source.clone(),
            target.clone(),
        ));
        let renderer = build_renderer(&config, caches, presenter);

        output.info(&format!("Watching {}", source.display()));
        output.info(&format!("Preview: {}", target.display()));
        output.info(&format!("Kroki URL: {}", config.render.kroki_url));

        if let Err(e) = renderer.warm_up().await {
            output.warning(&format!("Rendering engine unavailable: {e}"));
        }

        let session = Arc::new(Session {
            renderer,
            document: FileDocument::new(&source),
            target,
        });
        let outcome = session.run_pass().await;
        report_pass(&output, &session.renderer, &session.document, outcome);

        let debouncer = Arc::new(ChangeDebouncer::new(config.watch.debounce()));
        let _watcher = start_watcher(
            &source,
            session.document.id().clone(),
            Arc::clone(&debouncer),
        )?;

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    output.info("Stopping");
                    break;
                }
                _ = interval.tick() => {
                    for change in debouncer.drain_ready() {
                        handle_change(change.kind, &session, &debouncer, &output);
                    }
                }
            }
        }

        Ok(())
    }
}

/// React to one settled change without blocking the poll loop.
fn handle_change(
    kind: ChangeKind,
    session: &Arc<Session>,
    debouncer: &Arc<ChangeDebouncer>,
    output: &Output,
) {
    match kind {
        ChangeKind::Closed => {
            output.warning(&format!(
                "{} was removed; waiting for it to reappear",
                session.document.path().display()
            ));
        }
        ChangeKind::Changed => {
            let session = Arc::clone(session);
            let debouncer = Arc::clone(debouncer);
            tokio::spawn(async move {
                let outcome = session.run_pass().await;
                if outcome == PassOutcome::Skipped {
                    // Suppressed passes are not queued; try again once the
                    // running one settles
                    debouncer.record(session.document.id().clone(), ChangeKind::Changed);
                    return;
                }
                report_pass(&Output::new(), &session.renderer, &session.document, outcome);
            });
        }
    }
}

/// Watch the document's directory and feed matching events to `debouncer`.
fn start_watcher(
    source: &Path,
    document: DocumentId,
    debouncer: Arc<ChangeDebouncer>,
) -> Result<RecommendedWatcher, CliError> {
    let target = source.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        let Ok(event) = res else {
            return;
        };
        if let Some(kind) = classify(&event, &target) {
            debouncer.record(document.clone(), kind);
            tracing::debug!(path = %target.display(), ?kind, "Recorded document change");
        }
    })?;

    let dir = source.parent().unwrap_or(Path::new("."));
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Map a filesystem event to a change of the watched document, if it is one.
fn classify(event: &Event, target: &Path) -> Option<ChangeKind> {
    if !event.paths.iter().any(|path| path == target) {
        return None;
    }
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(ChangeKind::Changed),
        EventKind::Remove(_) => Some(ChangeKind::Closed),
        _ => None,
    }
}
