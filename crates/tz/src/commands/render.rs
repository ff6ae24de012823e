//! `tz render` command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tz_diagrams::FileDocument;

use crate::context::{CommonArgs, build_caches, build_renderer, resolve_document};
use crate::error::CliError;
use crate::output::Output;
use crate::preview::{HtmlPresenter, default_output, write_preview};

use super::report_pass;

/// Arguments for the render command.
#[derive(Args)]
pub(crate) struct RenderArgs {
    /// Markdown file to render.
    file: PathBuf,

    /// Output HTML file (default: input path with `.html` extension).
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

impl RenderArgs {
    /// Execute the render command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the preview cannot be written.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = self.common.load_config(None)?;

        let source = resolve_document(&self.file)?;
        let target = self.output.unwrap_or_else(|| default_output(&source));

        let caches = build_caches(&config)?;
        let presenter = Arc::new(HtmlPresenter::new(
            Arc::clone(&caches),
            source.clone(),
            target.clone(),
        ));
        let renderer = build_renderer(&config, caches, presenter);
        let document = FileDocument::new(&source);

        let outcome = renderer.render_document(&document).await;

        // Nothing may have needed a nudge; always leave a page behind
        write_preview(&source, &target, renderer.caches())?;
        report_pass(&output, &renderer, &document, outcome);
        output.info(&format!("Preview: {}", target.display()));

        Ok(())
    }
}
