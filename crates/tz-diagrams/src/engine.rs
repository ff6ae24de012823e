//! Rendering engine interface and the Kroki-backed engine.
//!
//! The scheduler owns exactly one [`Engine`] at a time and never calls it
//! concurrently. Engines are created lazily through an [`EngineLoader`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use ureq::Agent;

use crate::consts::ERROR_MESSAGE_LIMIT;

/// Directives derived from a block's source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileOptions {
    /// Package name to its option string (empty when none were given).
    pub packages: BTreeMap<String, String>,
    /// TikZ libraries in first-seen order, without duplicates.
    pub libraries: Vec<String>,
}

/// Engine failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine failed to load: {0}")]
    Load(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("{0}")]
    Compile(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A loaded TikZ-to-SVG compiler.
///
/// Implementations may keep internal state between calls; the caller
/// guarantees calls never overlap.
#[async_trait]
pub trait Engine: Send {
    /// Compile prepared source into SVG text.
    async fn compile(
        &mut self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<String, EngineError>;
}

/// Factory for [`Engine`] instances.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> Result<Box<dyn Engine>, EngineError>;
}

/// Turn an engine failure into a message fit for display next to a block.
///
/// TeX reports errors as a line starting with `! ` followed by a context
/// line. When such a marker exists only those two lines are kept, otherwise
/// the raw text is truncated.
#[must_use]
pub fn describe_failure(error: &EngineError) -> String {
    let text = error.to_string();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let line = line.trim_start();
        if line.starts_with("! ") {
            return match lines.next().map(str::trim).filter(|l| !l.is_empty()) {
                Some(context) => format!("{line}\n{context}"),
                None => line.to_owned(),
            };
        }
    }

    truncate_chars(text.trim(), ERROR_MESSAGE_LIMIT)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_owned(),
    }
}

/// Wrap prepared source into a complete standalone LaTeX document.
///
/// - Sources with their own `\documentclass` get the lifted declarations
///   re-inserted right after that line
/// - Sources with `\begin{document}` get the preamble prepended
/// - Bare drawing commands are wrapped in a `tikzpicture`
#[must_use]
pub fn standalone_document(body: &str, options: &CompileOptions) -> String {
    let declarations = declarations(body, options);

    if let Some(start) = body.find(r"\documentclass") {
        let split = body[start..].find('\n').map_or(body.len(), |i| start + i + 1);
        let (head, tail) = body.split_at(split);
        let head = if head.ends_with('\n') {
            head.to_owned()
        } else {
            format!("{head}\n")
        };
        return format!("{head}{declarations}{tail}");
    }

    let preamble = format!("\\documentclass[tikz,border=2pt]{{standalone}}\n{declarations}");
    if body.contains(r"\begin{document}") {
        return format!("{preamble}{body}");
    }

    let picture = if body.contains(r"\begin{tikzpicture}") || body.contains(r"\begin{tikzcd}") {
        body.to_owned()
    } else {
        format!("\\begin{{tikzpicture}}\n{body}\n\\end{{tikzpicture}}")
    };

    format!("{preamble}\\begin{{document}}\n{picture}\n\\end{{document}}\n")
}

/// `\usepackage` and `\usetikzlibrary` lines for `options`, one per line.
fn declarations(body: &str, options: &CompileOptions) -> String {
    let mut packages = options.packages.clone();
    if body.contains(r"\begin{tikzcd}") {
        packages.entry("tikz-cd".to_owned()).or_default();
    }

    let mut out = String::new();
    for (name, opts) in &packages {
        if opts.is_empty() {
            out.push_str(&format!("\\usepackage{{{name}}}\n"));
        } else {
            out.push_str(&format!("\\usepackage[{opts}]{{{name}}}\n"));
        }
    }
    if !options.libraries.is_empty() {
        out.push_str(&format!(
            "\\usetikzlibrary{{{}}}\n",
            options.libraries.join(",")
        ));
    }
    out
}

/// Create HTTP agent with the specified timeout.
fn create_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

/// Loads [`KrokiEngine`]s after checking the server is reachable.
#[derive(Debug, Clone)]
pub struct KrokiLoader {
    server_url: String,
    timeout: Duration,
}

impl KrokiLoader {
    /// Create a loader for the Kroki server at `server_url`.
    ///
    /// `timeout` bounds each HTTP request, independent of the scheduler's
    /// render timeout.
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_owned(),
            timeout,
        }
    }

    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[async_trait]
impl EngineLoader for KrokiLoader {
    async fn load(&self) -> Result<Box<dyn Engine>, EngineError> {
        let agent = create_agent(self.timeout);
        let url = format!("{}/health", self.server_url);
        let probe = agent.clone();

        let status = tokio::task::spawn_blocking(move || {
            probe
                .get(&url)
                .call()
                .map(|response| response.status().as_u16())
                .map_err(|e| EngineError::Load(e.to_string()))
        })
        .await
        .map_err(|e| EngineError::Load(e.to_string()))??;

        if status >= 400 {
            return Err(EngineError::Load(format!(
                "{} health check returned HTTP {status}",
                self.server_url
            )));
        }

        tracing::info!(server = %self.server_url, "Kroki engine ready");
        Ok(Box::new(KrokiEngine {
            agent,
            server_url: self.server_url.clone(),
        }))
    }
}

/// Engine that renders through a Kroki server's `tikz/svg` endpoint.
pub struct KrokiEngine {
    agent: Agent,
    server_url: String,
}

#[async_trait]
impl Engine for KrokiEngine {
    async fn compile(
        &mut self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<String, EngineError> {
        let document = standalone_document(source, options);
        let agent = self.agent.clone();
        let url = format!("{}/tikz/svg", self.server_url);

        tokio::task::spawn_blocking(move || send_diagram(&agent, &url, &document))
            .await
            .map_err(|e| EngineError::Compile(e.to_string()))?
    }
}

/// POST a document to Kroki and return the SVG body.
///
/// Handles HTTP errors by reading the response body for error details.
fn send_diagram(agent: &Agent, url: &str, document: &str) -> Result<String, EngineError> {
    let response = agent
        .post(url)
        .header("Content-Type", "text/plain")
        .send(document.as_bytes())
        .map_err(|e| EngineError::Http(e.to_string()))?;

    let status = response.status().as_u16();
    let mut body = response.into_body();

    if status >= 400 {
        let error_body = body
            .read_to_string()
            .unwrap_or_else(|_| String::from("(unable to read error body)"));
        return Err(EngineError::Compile(error_body));
    }

    body.read_to_string()
        .map_err(|e| EngineError::Http(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_describe_failure_tex_marker() {
        let err = EngineError::Compile(
            "This is pdfTeX\n! Undefined control sequence.\nl.5 \\dwar\n   (0,0)\nmore".to_owned(),
        );
        assert_eq!(
            describe_failure(&err),
            "! Undefined control sequence.\nl.5 \\dwar"
        );
    }

    #[test]
    fn test_describe_failure_marker_without_context() {
        let err = EngineError::Compile("! Undefined control sequence".to_owned());
        assert_eq!(describe_failure(&err), "! Undefined control sequence");
    }

    #[test]
    fn test_describe_failure_truncates_raw_text() {
        let err = EngineError::Compile("x".repeat(2000));
        let message = describe_failure(&err);
        assert_eq!(message.chars().count(), ERROR_MESSAGE_LIMIT + 1);
        assert!(message.ends_with('…'));
    }

    #[test]
    fn test_describe_failure_short_raw_text() {
        let err = EngineError::Http("connection refused".to_owned());
        assert_eq!(describe_failure(&err), "HTTP error: connection refused");
    }

    #[test]
    fn test_standalone_wraps_bare_commands() {
        let doc = standalone_document(r"\draw (0,0) -- (1,1);", &CompileOptions::default());
        assert_eq!(
            doc,
            "\\documentclass[tikz,border=2pt]{standalone}\n\\begin{document}\n\\begin{tikzpicture}\n\\draw (0,0) -- (1,1);\n\\end{tikzpicture}\n\\end{document}\n"
        );
    }

    #[test]
    fn test_standalone_includes_directives() {
        let mut options = CompileOptions::default();
        options.packages.insert("pgfplots".to_owned(), String::new());
        options.packages.insert("inputenc".to_owned(), "utf8".to_owned());
        options.libraries = vec!["calc".to_owned(), "positioning".to_owned()];

        let doc = standalone_document("\\begin{tikzpicture}\\end{tikzpicture}", &options);

        assert!(doc.contains("\\usepackage[utf8]{inputenc}\n\\usepackage{pgfplots}\n"));
        assert!(doc.contains("\\usetikzlibrary{calc,positioning}\n"));
        assert!(!doc.contains("\\begin{tikzpicture}\n\\begin{tikzpicture}"));
    }

    #[test]
    fn test_standalone_tikzcd_adds_package() {
        let doc = standalone_document(
            "\\begin{tikzcd}A \\arrow[r] & B\\end{tikzcd}",
            &CompileOptions::default(),
        );
        assert!(doc.contains("\\usepackage{tikz-cd}"));
        assert!(!doc.contains("tikzpicture"));
    }

    #[test]
    fn test_standalone_passes_full_documents_through() {
        let full = "\\documentclass{article}\n\\begin{document}x\\end{document}";
        assert_eq!(standalone_document(full, &CompileOptions::default()), full);

        let body_only = "\\begin{document}x\\end{document}";
        let doc = standalone_document(body_only, &CompileOptions::default());
        assert!(doc.starts_with("\\documentclass[tikz,border=2pt]{standalone}\n"));
        assert!(doc.ends_with(body_only));
    }

    #[test]
    fn test_full_document_keeps_lifted_declarations() {
        let source = "\\documentclass{standalone}\n\\usepackage[utf8]{inputenc}\n\\usepackage{pgfplots}\n\\usetikzlibrary{arrows}\n\\begin{document}\n\\begin{tikzpicture}\\draw (0,0);\\end{tikzpicture}\n\\end{document}";
        let prepared = crate::prepare::prepare_source(source, "1.16");
        assert!(!prepared.body.contains("\\usepackage"));

        let doc = standalone_document(&prepared.body, &prepared.options);

        assert_eq!(
            doc,
            "\\documentclass{standalone}\n\\usepackage[utf8]{inputenc}\n\\usepackage{pgfplots}\n\\usetikzlibrary{arrows}\n\\begin{document}\n\\begin{tikzpicture}\\draw (0,0);\\end{tikzpicture}\n\\end{document}"
        );
    }

    #[test]
    fn test_full_document_on_one_line_gets_declarations_after_class() {
        let mut options = CompileOptions::default();
        options.libraries.push("calc".to_owned());

        let doc = standalone_document("\\documentclass{article}", &options);

        assert_eq!(doc, "\\documentclass{article}\n\\usetikzlibrary{calc}\n");
    }

    #[test]
    fn test_loader_trims_trailing_slash() {
        let loader = KrokiLoader::new("https://kroki.io/", Duration::from_secs(5));
        assert_eq!(loader.server_url(), "https://kroki.io");
    }
}
