use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Line-ending style used when re-joining a patched buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eol {
    #[default]
    Lf,
    Crlf,
}

impl Eol {
    /// CRLF if any `\r\n` occurs in `source`, LF otherwise.
    #[must_use]
    pub fn detect(source: &str) -> Self {
        if source.contains("\r\n") {
            Self::Crlf
        } else {
            Self::Lf
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }
}

impl fmt::Display for Eol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lf => f.write_str("lf"),
            Self::Crlf => f.write_str("crlf"),
        }
    }
}

impl FromStr for Eol {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lf" => Ok(Self::Lf),
            "crlf" => Ok(Self::Crlf),
            other => Err(format!("unknown line ending '{other}' (expected 'lf' or 'crlf')")),
        }
    }
}

/// Split on `\n`, dropping a trailing `\r` from each line.
///
/// A trailing newline yields a final empty line, which keeps it on re-join.
pub(crate) fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

pub(crate) fn join_lines(lines: &[String], eol: Eol) -> String {
    lines.join(eol.as_str())
}
