//! Preview embedding.
//!
//! Replaces each TikZ fence in Markdown with an HTML `<figure>` built from
//! whatever the caller's lookup currently knows: the rendered SVG, an error
//! with a retry affordance, or a placeholder. Blocks that got a placeholder
//! are reported back so the caller can schedule a render.

use crate::block::fences;
use crate::caches::RenderResult;
use crate::fingerprint::Fingerprint;

/// Markdown with every TikZ fence replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    /// Markdown whose diagram blocks are raw HTML figures.
    pub markdown: String,
    /// Fingerprints without a result yet, deduplicated, in document order.
    pub pending: Vec<Fingerprint>,
}

/// Embed current results into `markdown`.
///
/// `lookup` is queried once per block and must not block; pass
/// [`DocumentRenderer::get_result`](crate::DocumentRenderer::get_result).
pub fn embed_preview<F>(markdown: &str, lookup: F) -> Preview
where
    F: Fn(&Fingerprint) -> Option<RenderResult>,
{
    let mut out = String::with_capacity(markdown.len());
    let mut pending = Vec::new();
    let mut last = 0;

    for fence in fences(markdown) {
        let fingerprint = Fingerprint::of_source(fence.body);
        out.push_str(&markdown[last..fence.range.start]);

        let figure = match lookup(&fingerprint) {
            Some(RenderResult::Artifact(svg)) => artifact_figure(&fingerprint, &svg),
            Some(RenderResult::Error(message)) => error_figure(&fingerprint, &message),
            None => {
                if !pending.contains(&fingerprint) {
                    pending.push(fingerprint.clone());
                }
                placeholder_figure(&fingerprint)
            }
        };
        out.push_str(&figure);
        // HTML blocks end at a blank line
        out.push('\n');
        last = fence.range.end;
    }
    out.push_str(&markdown[last..]);

    Preview {
        markdown: out,
        pending,
    }
}

fn artifact_figure(fingerprint: &Fingerprint, svg: &str) -> String {
    // Keep the figure on one line so Markdown treats it as a single HTML block
    let svg = svg.replace(['\r', '\n'], " ");
    format!(r#"<figure class="tikz" data-fingerprint="{fingerprint}">{svg}</figure>"#)
}

fn error_figure(fingerprint: &Fingerprint, message: &str) -> String {
    let message = escape_html(message).replace('\n', "&#10;");
    format!(
        r#"<figure class="tikz tikz-error" data-fingerprint="{fingerprint}"><pre>{message}</pre><button type="button" data-retry="{fingerprint}">Retry</button></figure>"#
    )
}

fn placeholder_figure(fingerprint: &Fingerprint) -> String {
    format!(
        r#"<figure class="tikz tikz-pending" data-fingerprint="{fingerprint}"><p>Rendering diagram…</p></figure>"#
    )
}

/// Escape special HTML characters.
#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}
