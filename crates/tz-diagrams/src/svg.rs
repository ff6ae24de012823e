//! SVG post-processing for the preview.
//!
//! Engine output is cleaned up before it reaches the Memory Cache:
//! - XML declaration, doctype and comments are stripped
//! - Whitespace between tags is collapsed
//! - In dark mode, black strokes and fills follow the text color and white
//!   fills follow the preview background
//!
//! The Persistent Cache always stores the raw engine output, so switching
//! themes only needs a re-run of [`PostProcess::process`].

use std::sync::LazyLock;

use regex::Regex;

static XML_DECL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<\?xml.*?\?>\s*").unwrap());

static DOCTYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!DOCTYPE[^>]*>\s*").unwrap());

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static BETWEEN_TAGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s+<").unwrap());

/// `fill`/`stroke` attributes and style properties set to black.
static BLACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:fill|stroke)\s*[=:]\s*"?)(?:#000000\b|#000\b|black\b|rgb\(0%?,\s*0%?,\s*0%?\))"#)
        .unwrap()
});

/// `fill` attributes and style properties set to white.
static WHITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(fill\s*[=:]\s*"?)(?:#ffffff\b|#fff\b|white\b|rgb\(100%,\s*100%,\s*100%\))"#)
        .unwrap()
});

/// Color substituted for white fills in dark mode.
pub const DARK_BACKGROUND: &str = "var(--tz-background, #1e1e1e)";

/// Error from a post-processor.
#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("artifact is not an SVG document")]
    NotSvg,
}

/// Theme-aware transform applied to engine output.
///
/// Must be pure. Callers treat an error as "use the raw artifact".
pub trait PostProcess: Send + Sync {
    fn process(&self, svg: &str, dark_mode: bool) -> Result<String, PostProcessError>;
}

/// Default regex-based SVG cleanup.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgPostProcessor;

impl PostProcess for SvgPostProcessor {
    fn process(&self, svg: &str, dark_mode: bool) -> Result<String, PostProcessError> {
        if !svg.contains("<svg") {
            return Err(PostProcessError::NotSvg);
        }

        let out = XML_DECL_RE.replace_all(svg, "");
        let out = DOCTYPE_RE.replace_all(&out, "");
        let out = COMMENT_RE.replace_all(&out, "");
        let out = BETWEEN_TAGS_RE.replace_all(&out, "><");

        if !dark_mode {
            return Ok(out.trim().to_owned());
        }

        let out = BLACK_RE.replace_all(&out, "${1}currentColor");
        let out = WHITE_RE.replace_all(&out, format!("${{1}}{DARK_BACKGROUND}").as_str());
        Ok(out.trim().to_owned())
    }
}

/// Run `processor`, falling back to the unprocessed artifact on failure.
pub fn post_process_or_raw(processor: &dyn PostProcess, svg: &str, dark_mode: bool) -> String {
    match processor.process(svg, dark_mode) {
        Ok(processed) => processed,
        Err(e) => {
            tracing::debug!(error = %e, "post-processing failed, using raw artifact");
            svg.to_owned()
        }
    }
}
