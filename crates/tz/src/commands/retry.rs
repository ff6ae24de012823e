//! `tz retry` command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tz_diagrams::{Block, Document, FileDocument, RenderResult, extract_blocks};

use crate::context::{CommonArgs, build_caches, build_renderer, resolve_document};
use crate::error::CliError;
use crate::output::Output;
use crate::preview::{HtmlPresenter, default_output};

/// Shortest fingerprint prefix accepted on the command line.
const MIN_PREFIX_LEN: usize = 6;

/// Arguments for the retry command.
#[derive(Args)]
pub(crate) struct RetryArgs {
    /// Markdown file containing the block.
    file: PathBuf,

    /// Fingerprint of the block, or a unique prefix of at least 6 characters.
    fingerprint: String,

    /// Output HTML file (default: input path with `.html` extension).
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

impl RetryArgs {
    /// Execute the retry command.
    ///
    /// # Errors
    ///
    /// Returns an error if no block matches or the block still fails to render.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = self.common.load_config(None)?;

        let source = resolve_document(&self.file)?;
        let target = self.output.unwrap_or_else(|| default_output(&source));
        let document = FileDocument::new(&source);
        let text = document
            .text()
            .ok_or_else(|| CliError::Validation(format!("Cannot read {}", source.display())))?;
        let blocks = extract_blocks(&text);
        let block = find_block(&blocks, &self.fingerprint)?;

        let caches = build_caches(&config)?;
        let presenter = Arc::new(HtmlPresenter::new(Arc::clone(&caches), source, target));
        let renderer = build_renderer(&config, caches, presenter);

        let result = renderer
            .retry_block(&block.fingerprint, &block.source, document.id())
            .await;

        match result {
            RenderResult::Artifact(_) => {
                output.success(&format!(
                    "Block at line {} rendered",
                    block.position.line + 1
                ));
                Ok(())
            }
            RenderResult::Error(message) => {
                output.error(&format!(
                    "Block at line {} failed:",
                    block.position.line + 1
                ));
                output.detail(&message);
                Err(CliError::Validation("Block still fails to render".to_owned()))
            }
        }
    }
}

/// Find the block whose fingerprint is `query` or starts with it.
fn find_block<'a>(blocks: &'a [Block], query: &str) -> Result<&'a Block, CliError> {
    let query = query.trim().to_ascii_lowercase();
    if query.len() < MIN_PREFIX_LEN || !query.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CliError::Validation(format!(
            "Fingerprint must be at least {MIN_PREFIX_LEN} hex characters, got '{query}'"
        )));
    }

    let mut matches = blocks
        .iter()
        .filter(|block| block.fingerprint.as_str().starts_with(&query));
    let Some(first) = matches.next() else {
        return Err(CliError::Validation(format!(
            "No TikZ block with fingerprint {query}"
        )));
    };
    if matches.any(|other| other.fingerprint != first.fingerprint) {
        return Err(CliError::Validation(format!(
            "Fingerprint prefix {query} is ambiguous"
        )));
    }
    Ok(first)
}
