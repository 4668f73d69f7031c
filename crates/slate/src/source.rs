//! Where a template came from, for diagnostics.

use std::{fmt, fs, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Number of lines shown on each side of an error line.
const CONTEXT_RADIUS: usize = 3;

/// Source descriptor attached to every compiled [`Program`](crate::Program).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Source {
    /// Template compiled from an in-memory string.
    Text(String),
    /// Template loaded from a file; the text is read back only for error context.
    File(PathBuf),
    /// No source text is available.
    #[default]
    Anonymous,
}

impl Source {
    #[must_use]
    pub fn from_string(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Display name used in diagnostics: the file path, or `-`.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Text(_) | Self::Anonymous => "-".to_owned(),
        }
    }

    /// Source lines, or `None` if the text is unavailable.
    #[must_use]
    pub fn lines(&self) -> Option<Vec<String>> {
        match self {
            Self::Text(text) => Some(text.lines().map(str::to_owned).collect()),
            Self::File(path) => fs::read_to_string(path)
                .ok()
                .map(|text| text.lines().map(str::to_owned).collect()),
            Self::Anonymous => None,
        }
    }

    /// Lines around 1-based `line`, the line itself marked with `* `.
    #[must_use]
    pub fn context(&self, line: u32) -> Option<String> {
        let lines = self.lines()?;
        let target = usize::try_from(line).ok()?.checked_sub(1)?;
        if target >= lines.len() {
            return None;
        }
        let start = target.saturating_sub(CONTEXT_RADIUS);
        let end = (target + CONTEXT_RADIUS + 1).min(lines.len());
        let mut out = String::new();
        for (i, text) in lines.iter().enumerate().take(end).skip(start) {
            let marker = if i == target { "* " } else { "  " };
            out.push_str(marker);
            out.push_str(text);
            out.push('\n');
        }
        Some(out)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_marks_line() {
        let src = Source::from_string("a\nb\nc\nd\ne\nf\ng\nh");
        assert_eq!(
            src.context(5).unwrap(),
            "  b\n  c\n  d\n* e\n  f\n  g\n  h\n"
        );
    }

    #[test]
    fn context_clamps_at_edges() {
        let src = Source::from_string("one\ntwo");
        assert_eq!(src.context(1).unwrap(), "* one\n  two\n");
        assert!(src.context(3).is_none());
        assert!(src.context(0).is_none());
    }

    #[test]
    fn anonymous_has_no_context() {
        assert_eq!(Source::Anonymous.name(), "-");
        assert!(Source::Anonymous.context(1).is_none());
    }
}
