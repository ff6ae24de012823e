//! Fenced TikZ block extraction.
//!
//! Scans Markdown text for fenced code blocks tagged `tikz` and produces an
//! ordered list of [`Block`]s. Extraction never fails: malformed or
//! unterminated fences simply do not match.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::consts::TIKZ_FENCE_TAG;
use crate::fingerprint::Fingerprint;

/// Opening fence tagged `tikz` (any case, whitespace tolerant), a lazily
/// matched body, then the first closing fence on its own line.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?mR)^[ \t]*```[ \t]*(?i:{TIKZ_FENCE_TAG})[ \t]*\r?\n(?s:(.*?))^[ \t]*```[ \t]*$"
    ))
    .unwrap()
});

/// Location of a block's opening fence in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePosition {
    /// Byte offset into the document text.
    pub offset: usize,
    /// Zero-based line number.
    pub line: usize,
    /// Zero-based column, in characters.
    pub column: usize,
}

impl SourcePosition {
    /// Map a byte offset in `text` to a line/column position.
    ///
    /// Offsets past the end are clamped to the end of the text.
    #[must_use]
    pub fn locate(text: &str, offset: usize) -> Self {
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &text[..offset];
        let line = before.matches('\n').count();
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        Self {
            offset,
            line,
            column: before[line_start..].chars().count(),
        }
    }
}

/// One fenced TikZ block found in a document.
///
/// Blocks are created fresh on every scan and never mutated. `id` is unique
/// per extraction; `fingerprint` is stable as long as the trimmed source is.
#[derive(Debug, Clone)]
pub struct Block {
    /// Opaque token unique to this extraction.
    pub id: Uuid,
    /// Block body as written (without the fences).
    pub source: String,
    /// Fingerprint of the trimmed body.
    pub fingerprint: Fingerprint,
    /// Position of the opening fence.
    pub position: SourcePosition,
}

/// A matched fence: the byte range of the whole block and its body.
pub(crate) struct FenceMatch<'a> {
    pub range: Range<usize>,
    pub body: &'a str,
}

/// Iterate over every TikZ fence in `text`, in document order.
pub(crate) fn fences(text: &str) -> impl Iterator<Item = FenceMatch<'_>> {
    FENCE_RE.captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        let body = caps.get(1).map_or("", |m| m.as_str());
        Some(FenceMatch {
            range: whole.range(),
            body: strip_final_newline(body),
        })
    })
}

/// Extract all TikZ blocks from document text.
///
/// Empty or whitespace-only bodies still produce a block.
#[must_use]
pub fn extract_blocks(text: &str) -> Vec<Block> {
    fences(text)
        .map(|fence| Block {
            id: Uuid::new_v4(),
            source: fence.body.to_owned(),
            fingerprint: Fingerprint::of_source(fence.body),
            position: SourcePosition::locate(text, fence.range.start),
        })
        .collect()
}

/// Drop the line terminator that precedes the closing fence.
fn strip_final_newline(body: &str) -> &str {
    body.strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body)
}
