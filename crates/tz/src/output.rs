//! Styled status lines on stderr.

use console::{Style, Term};

/// How a status line is colored.
#[derive(Clone, Copy)]
enum Tone {
    Plain,
    Good,
    Caution,
    Bad,
    Muted,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Plain => Style::new(),
            Self::Good => Style::new().green(),
            Self::Caution => Style::new().yellow(),
            Self::Bad => Style::new().red().bold(),
            Self::Muted => Style::new().dim(),
        }
    }
}

/// Writes status lines for the user; stdout stays free for piping.
pub(crate) struct Output {
    term: Term,
}

impl Output {
    pub(crate) fn new() -> Self {
        Self {
            term: Term::stderr(),
        }
    }

    fn line(&self, tone: Tone, msg: &str) {
        // Nothing useful to do if stderr is gone
        let _ = self.term.write_line(&tone.style().apply_to(msg).to_string());
    }

    pub(crate) fn info(&self, msg: &str) {
        self.line(Tone::Plain, msg);
    }

    pub(crate) fn success(&self, msg: &str) {
        self.line(Tone::Good, msg);
    }

    pub(crate) fn warning(&self, msg: &str) {
        self.line(Tone::Caution, msg);
    }

    pub(crate) fn error(&self, msg: &str) {
        self.line(Tone::Bad, msg);
    }

    /// Multi-line detail such as a compiler log, indented under the
    /// previous line.
    pub(crate) fn detail(&self, msg: &str) {
        for line in msg.lines() {
            self.line(Tone::Muted, &format!("    {line}"));
        }
    }
}
