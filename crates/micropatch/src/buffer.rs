use crate::apply::apply_ops;
use crate::eol::{split_lines, Eol};
use crate::error::Result;
use crate::parser::parse_ops;

/// A text buffer that micropatches can be applied to repeatedly.
///
/// The line-ending style is detected once from the initial text and reused
/// for every later re-join unless overridden with [`Micropatch::with_eol`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Micropatch {
    text: String,
    eol: Eol,
}

impl Micropatch {
    pub fn new(source: impl Into<String>) -> Self {
        let text = source.into();
        let eol = Eol::detect(&text);
        Self { text, eol }
    }

    #[must_use]
    pub fn with_eol(mut self, eol: Eol) -> Self {
        self.eol = eol;
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub const fn eol(&self) -> Eol {
        self.eol
    }

    /// Replace the buffer contents; `None` re-detects the line ending.
    pub fn set_text(&mut self, source: impl Into<String>, eol: Option<Eol>) {
        self.text = source.into();
        self.eol = eol.unwrap_or_else(|| Eol::detect(&self.text));
    }

    /// Parse `ops_text`, apply it and return the new buffer text.
    ///
    /// On a parse error the buffer is left untouched.
    pub fn apply(&mut self, ops_text: &str) -> Result<String> {
        let ops = parse_ops(ops_text)?;
        self.text = apply_ops(&self.text, &ops, self.eol);
        Ok(self.text.clone())
    }

    /// Numbered preview of the buffer, joined with the buffer's line ending
    #[must_use]
    pub fn render_numbered(&self) -> String {
        render_with(&self.text, self.eol)
    }
}

/// Render `source` as `NNN|line` rows joined with `\n`.
///
/// Numbers are zero padded to at least three digits, wider when the
/// document has 1000 lines or more.
#[must_use]
pub fn render_numbered(source: &str) -> String {
    render_with(source, Eol::Lf)
}

fn render_with(source: &str, eol: Eol) -> String {
    let lines = split_lines(source);
    let width = lines.len().to_string().len().max(3);
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:0width$}|{line}", i + 1))
        .collect::<Vec<_>>()
        .join(eol.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MARKER;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_numbered_view() {
        assert_eq!(render_numbered("a\nb"), "001|a\n002|b");
        let long: String = (0..1000).map(|_| "x\n").collect();
        let view = render_numbered(&long);
        assert!(view.starts_with("0001|x\n"));
        assert!(view.ends_with("1001|"));
    }

    #[test]
    fn buffer_keeps_detected_eol() {
        let mut buffer = Micropatch::new("a\r\nb\r\nc\r\n");
        assert_eq!(buffer.eol(), Eol::Crlf);

        let text = buffer.apply(&format!("{MARKER}=2|B")).unwrap();
        assert_eq!(text, "a\r\nB\r\nc\r\n");
        assert_eq!(buffer.render_numbered(), "001|a\r\n002|B\r\n003|c\r\n004|");
    }

    #[test]
    fn failed_parse_leaves_buffer_untouched() {
        let mut buffer = Micropatch::new("a\nb\n");
        assert!(buffer.apply(&format!("{MARKER}-1|oops")).is_err());
        assert_eq!(buffer.text(), "a\nb\n");
    }

    #[test]
    fn set_text_redetects_eol() {
        let mut buffer = Micropatch::new("a\nb").with_eol(Eol::Crlf);
        assert_eq!(buffer.eol(), Eol::Crlf);
        buffer.set_text("x\ny", None);
        assert_eq!(buffer.eol(), Eol::Lf);
        buffer.set_text("x\ny", Some(Eol::Crlf));
        assert_eq!(buffer.apply("").unwrap(), "x\r\ny");
    }
}
