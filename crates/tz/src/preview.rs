//! HTML preview page generation.
//!
//! The CLI stands in for an editor's preview pane: every nudge from the
//! renderer rewrites a standalone HTML page from the document's current text
//! and whatever results the Memory Cache holds at that moment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pulldown_cmark::{Options, Parser, html};
use tz_diagrams::{DocumentId, Presenter, RenderCaches, embed_preview, escape_html};

use crate::error::CliError;

const STYLE: &str = r"
body { font-family: system-ui, sans-serif; max-width: 52rem; margin: 2rem auto; padding: 0 1rem; }
body.dark { --tz-background: #1e1e1e; background: #1e1e1e; color: #d4d4d4; }
figure.tikz { margin: 1.5rem 0; text-align: center; }
figure.tikz svg { max-width: 100%; height: auto; }
figure.tikz-error pre { text-align: left; color: #c62828; white-space: pre-wrap; }
figure.tikz-pending { color: #888; font-style: italic; }
";

/// Default output path: the document with an `.html` extension.
pub(crate) fn default_output(document: &Path) -> PathBuf {
    document.with_extension("html")
}

/// Write the preview page for `source` to `output`.
///
/// Returns the number of blocks still waiting for a result.
pub(crate) fn write_preview(
    source: &Path,
    output: &Path,
    caches: &RenderCaches,
) -> Result<usize, CliError> {
    let markdown = std::fs::read_to_string(source)?;
    let preview = embed_preview(&markdown, |fp| caches.get(fp));

    let title = source
        .file_name()
        .map_or_else(String::new, |name| name.to_string_lossy().into_owned());
    let page = render_page(&title, &preview.markdown, caches.dark_mode());

    std::fs::write(output, page)?;
    Ok(preview.pending.len())
}

/// Wrap rendered Markdown in a standalone HTML page.
fn render_page(title: &str, markdown: &str, dark_mode: bool) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut body = String::with_capacity(markdown.len());
    html::push_html(&mut body, Parser::new_ext(markdown, options));

    let class = if dark_mode { "dark" } else { "light" };
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body class=\"{class}\">\n{body}</body>\n</html>\n",
        escape_html(title)
    )
}

/// Presenter that regenerates the HTML page on every nudge.
pub(crate) struct HtmlPresenter {
    caches: Arc<RenderCaches>,
    source: PathBuf,
    output: PathBuf,
}

impl HtmlPresenter {
    pub(crate) fn new(caches: Arc<RenderCaches>, source: PathBuf, output: PathBuf) -> Self {
        Self {
            caches,
            source,
            output,
        }
    }
}

#[async_trait]
impl Presenter for HtmlPresenter {
    async fn request_refresh(&self, document: &DocumentId) {
        match write_preview(&self.source, &self.output, &self.caches) {
            Ok(pending) => {
                tracing::debug!(%document, pending, "Preview refreshed");
            }
            Err(e) => {
                tracing::warn!(%document, error = %e, "Failed to write preview");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tz_cache::{MemoryStore, PersistentCache};
    use tz_diagrams::{Fingerprint, SvgPostProcessor};

    fn caches() -> Arc<RenderCaches> {
        let persistent = PersistentCache::open(Box::new(MemoryStore::new()), "tikz").unwrap();
        Arc::new(RenderCaches::new(persistent, SvgPostProcessor, false))
    }

    #[test]
    fn test_write_preview_embeds_results() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("doc.md");
        let output = default_output(&source);
        std::fs::write(
            &source,
            "# Diagrams\n\n```tikz\n\\draw (0,0);\n```\n\n```tikz\n\\fill (1,1);\n```\n",
        )
        .unwrap();

        let caches = caches();
        caches.store_artifact(&Fingerprint::of_source("\\draw (0,0);"), "<svg>drawn</svg>");

        let pending = write_preview(&source, &output, &caches).unwrap();
        let page = std::fs::read_to_string(&output).unwrap();

        assert_eq!(pending, 1);
        assert!(page.contains("<h1>Diagrams</h1>"));
        assert!(page.contains("<svg>drawn</svg>"));
        assert!(page.contains("tikz-pending"));
        assert!(page.contains("<title>doc.md</title>"));
        assert!(page.contains("<body class=\"light\">"));
    }

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("/docs/notes.md")),
            PathBuf::from("/docs/notes.html")
        );
    }

    #[tokio::test]
    async fn test_presenter_writes_page() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("doc.md");
        let output = temp.path().join("out.html");
        std::fs::write(&source, "text").unwrap();

        let presenter = HtmlPresenter::new(caches(), source, output.clone());
        presenter.request_refresh(&DocumentId::new("doc")).await;

        assert!(std::fs::read_to_string(&output).unwrap().contains("<p>text</p>"));
    }
}
