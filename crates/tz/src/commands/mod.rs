//! CLI command implementations.

pub(crate) mod cache;
pub(crate) mod render;
pub(crate) mod retry;
pub(crate) mod watch;

pub(crate) use cache::CacheCommand;
pub(crate) use render::RenderArgs;
pub(crate) use retry::RetryArgs;
pub(crate) use watch::WatchArgs;

use tz_diagrams::{Document, DocumentRenderer, PassOutcome, extract_blocks};

use crate::output::Output;

/// Print a pass summary followed by every block that failed.
pub(crate) fn report_pass(
    output: &Output,
    renderer: &DocumentRenderer,
    document: &dyn Document,
    outcome: PassOutcome,
) {
    let report = match outcome {
        PassOutcome::Skipped => {
            output.warning("A render pass is already running; skipped");
            return;
        }
        PassOutcome::Completed(report) => report,
    };

    if report.blocks == 0 {
        output.info("No TikZ blocks found");
        return;
    }

    let summary = format!(
        "{} block(s): {} rendered, {} from cache, {} unchanged",
        report.blocks, report.rendered, report.persistent_hits, report.memory_hits
    );
    if report.failed == 0 {
        output.success(&summary);
    } else {
        output.warning(&format!("{summary}, {} failed", report.failed));
    }

    report_failures(output, renderer, document);
}

/// List every block in `document` whose current result is an error.
pub(crate) fn report_failures(output: &Output, renderer: &DocumentRenderer, document: &dyn Document) {
    let Some(text) = document.text() else {
        return;
    };

    let mut seen = Vec::new();
    for block in extract_blocks(&text) {
        if seen.contains(&block.fingerprint) {
            continue;
        }
        let Some(result) = renderer.get_result(&block.fingerprint) else {
            continue;
        };
        if let Some(message) = result.error_message() {
            output.error(&format!(
                "Block at line {} ({}) failed:",
                block.position.line + 1,
                block.fingerprint.short()
            ));
            output.detail(message);
        }
        seen.push(block.fingerprint);
    }
}
