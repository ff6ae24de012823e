//! Source preparation before an engine call.
//!
//! Turns raw block source into the body handed to the engine plus the
//! package and library directives found in it:
//!
//! 1. Normalize: non-breaking spaces become spaces, every line is trimmed and
//!    blank lines are dropped.
//! 2. Clamp `\pgfplotsset{compat=X}` to the highest level the engine supports.
//! 3. Lift `\usepackage` and `\usetikzlibrary` declarations out of the body.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::engine::CompileOptions;

static COMPAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\\pgfplotsset\s*\{[^}]*?compat\s*=\s*)([A-Za-z0-9.]+)").unwrap()
});

static USEPACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\usepackage\s*(?:\[([^\]]*)\])?\s*\{([^}]*)\}").unwrap()
});

static TIKZLIBRARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\usetikzlibrary\s*\{([^}]*)\}").unwrap());

/// Engine-ready source with its derived directives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreparedSource {
    /// Normalized body with declarations removed.
    pub body: String,
    /// Packages and libraries the body asked for.
    pub options: CompileOptions,
}

/// Run every preparation step over `source`.
///
/// `max_compat` is the highest `pgfplots` compat level (`MAJOR.MINOR`) the
/// engine understands.
#[must_use]
pub fn prepare_source(source: &str, max_compat: &str) -> PreparedSource {
    let normalized = normalize(source);
    let clamped = clamp_pgfplots_compat(&normalized, max_compat);

    let mut options = CompileOptions::default();
    let mut lines = Vec::new();

    for line in clamped.lines() {
        let mut rest = line.to_owned();

        if USEPACKAGE_RE.is_match(&rest) {
            for caps in USEPACKAGE_RE.captures_iter(line) {
                let opts = caps.get(1).map_or("", |m| m.as_str().trim());
                for name in split_list(&caps[2]) {
                    options.packages.insert(name.to_owned(), opts.to_owned());
                }
            }
            rest = USEPACKAGE_RE.replace_all(&rest, "").into_owned();
        }

        if TIKZLIBRARY_RE.is_match(&rest) {
            for caps in TIKZLIBRARY_RE.captures_iter(&rest) {
                for name in split_list(&caps[1]) {
                    if !options.libraries.iter().any(|l| l == name) {
                        options.libraries.push(name.to_owned());
                    }
                }
            }
            rest = TIKZLIBRARY_RE.replace_all(&rest, "").into_owned();
        }

        let rest = rest.trim();
        if !rest.is_empty() {
            lines.push(rest.to_owned());
        }
    }

    PreparedSource {
        body: lines.join("\n"),
        options,
    }
}

/// Replace NBSP, trim lines and drop blank ones.
#[must_use]
pub fn normalize(source: &str) -> String {
    source
        .replace('\u{a0}', " ")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Clamp every `compat=` level in `\pgfplotsset` to `max_compat`.
///
/// `newest` is pinned to `max_compat`; unparseable levels are left alone.
#[must_use]
pub fn clamp_pgfplots_compat(source: &str, max_compat: &str) -> String {
    let Some(max) = parse_level(max_compat) else {
        return source.to_owned();
    };

    COMPAT_RE
        .replace_all(source, |caps: &Captures<'_>| {
            let level = &caps[2];
            let clamped = if level.eq_ignore_ascii_case("newest") {
                max_compat
            } else {
                match parse_level(level) {
                    Some(found) if found > max => max_compat,
                    _ => level,
                }
            };
            format!("{}{clamped}", &caps[1])
        })
        .into_owned()
}

fn parse_level(level: &str) -> Option<(u32, u32)> {
    let (major, minor) = level.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}
