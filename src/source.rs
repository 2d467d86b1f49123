//! Module source text and diagnostic excerpts

use std::fmt;
use std::path::{Path, PathBuf};

use crate::consts::{EXCERPT_MAX_LINES, EXCERPT_RULE_WIDTH};
use crate::parser::Span;

/// Raw module text plus its line-split form. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceModule {
    text: String,
    lines: Vec<String>,
    path: Option<PathBuf>,
}

impl SourceModule {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let lines = text.lines().map(str::to_string).collect();
        Self { text, lines, path: None }
    }

    /// Load a module from disk
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut module = Self::new(text);
        module.path = Some(path.to_path_buf());
        Ok(module)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Line by 1-based number
    pub fn line(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|index| self.lines.get(index))
            .map(String::as_str)
    }

    /// Render the lines covered by `span`, headed by the node kind and its position
    pub fn excerpt(&self, node: &str, span: Span) -> Excerpt {
        let first = span.start.line.max(1);
        let last = span.end.line.max(first);
        let shown_last = last.min(first + EXCERPT_MAX_LINES - 1);
        let lines = (first..=shown_last)
            .filter_map(|number| self.line(number).map(|text| (number, text.to_string())))
            .collect();
        Excerpt {
            node: node.to_string(),
            span,
            lines,
            omitted: last - shown_last,
        }
    }
}

impl From<&str> for SourceModule {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for SourceModule {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// The offending region of a module, ready to print:
///
/// ```text
/// Assign at line 3, col 1 -----------------------------------------------
///    3 | x = 1
/// -----------------------------------------------------------------------
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    /// Syntax node kind, e.g. `Assign` or `Name`
    pub node: String,
    pub span: Span,
    /// `(line number, text)` pairs
    pub lines: Vec<(usize, String)>,
    /// Lines of the region past the rendering cap
    pub omitted: usize,
}

impl Excerpt {
    pub fn line(&self) -> usize {
        self.span.start.line
    }

    pub fn column(&self) -> usize {
        self.span.start.column
    }
}

impl fmt::Display for Excerpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = format!("{} at line {}, col {} ", self.node, self.line(), self.column());
        let fill = EXCERPT_RULE_WIDTH.saturating_sub(header.chars().count());
        writeln!(f, "{}{}", header, "-".repeat(fill))?;
        for (number, text) in &self.lines {
            writeln!(f, "{:>4} | {}", number, text)?;
        }
        if self.omitted > 0 {
            writeln!(f, "     | ... {} more line(s)", self.omitted)?;
        }
        write!(f, "{}", "-".repeat(EXCERPT_RULE_WIDTH))
    }
}
