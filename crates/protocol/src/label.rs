//! Label protocol: one `■key:【explanation】:VALUE■` line per label key,
//! terminated by `■END■`.

use crate::error::{ProtocolError, Result};
use crate::{truncate_at, GLYPH, LIST_END};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const OPEN: char = '【';
const CLOSE: &str = "】:";

/// Five-level verdict for one label question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelValue {
    AbsolutelyNot,
    ProbablyNot,
    Ambiguous,
    ProbablyYes,
    AbsolutelyYes,
}

impl LabelValue {
    pub const ALL: [Self; 5] = [
        Self::AbsolutelyNot,
        Self::ProbablyNot,
        Self::Ambiguous,
        Self::ProbablyYes,
        Self::AbsolutelyYes,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AbsolutelyNot => "ABSOLUTELY_NOT",
            Self::ProbablyNot => "PROBABLY_NOT",
            Self::Ambiguous => "AMBIGUOUS",
            Self::ProbablyYes => "PROBABLY_YES",
            Self::AbsolutelyYes => "ABSOLUTELY_YES",
        }
    }

    #[must_use]
    pub const fn confidence(self) -> f64 {
        match self {
            Self::AbsolutelyNot | Self::AbsolutelyYes => 1.0,
            Self::ProbablyNot | Self::ProbablyYes => 0.5,
            Self::Ambiguous => 0.0,
        }
    }

    #[must_use]
    pub const fn is_yes(self) -> bool {
        matches!(self, Self::ProbablyYes | Self::AbsolutelyYes)
    }

    /// Lenient reading of whatever the model wrote in the value slot
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        let upper = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_uppercase();
        let absolutely = upper.contains("ABSOLUTELY");
        if upper.contains("NOT") {
            if absolutely {
                Self::AbsolutelyNot
            } else {
                Self::ProbablyNot
            }
        } else if upper.contains("AMBIGUOUS") {
            Self::Ambiguous
        } else if upper.contains("YES") {
            if absolutely {
                Self::AbsolutelyYes
            } else {
                Self::ProbablyYes
            }
        } else {
            Self::Ambiguous
        }
    }
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LabelValue {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|value| value.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| format!("unknown label value '{raw}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LabelVerdict {
    pub explanation: String,
    pub value: LabelValue,
}

impl LabelVerdict {
    #[must_use]
    pub fn unanswered() -> Self {
        Self {
            explanation: String::new(),
            value: LabelValue::Ambiguous,
        }
    }
}

#[must_use]
pub fn format_label_line(key: &str, explanation: &str, value: LabelValue) -> String {
    format!("■{key}:【{explanation}】:{value}■")
}

/// Find `■key:【…】:VALUE■` for one key on a single line.
fn scan_key(text: &str, folded: &str, key: &str) -> Option<LabelVerdict> {
    let needle = format!("{GLYPH}{}:{OPEN}", key.to_ascii_lowercase());
    let mut from = 0;
    while let Some(found) = folded[from..].find(&needle) {
        let start = from + found + needle.len();
        from = start;
        let line_end = text[start..].find('\n').map_or(text.len(), |n| start + n);
        let line = &text[start..line_end];

        // The explanation is greedy: take the last `】:VALUE■` on the line
        let mut search_end = line.len();
        while let Some(close) = line[..search_end].rfind(CLOSE) {
            search_end = close;
            let after = &line[close + CLOSE.len()..];
            let word = after
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                .count();
            if word >= 2 && after[word..].starts_with(GLYPH) {
                let explanation = line[..close].trim();
                if explanation.is_empty() {
                    continue;
                }
                return Some(LabelVerdict {
                    explanation: explanation.to_string(),
                    value: LabelValue::parse_lenient(&after[..word]),
                });
            }
        }
    }
    None
}

/// Parse one reply for the given label keys, in key order.
///
/// Keys the reply does not mention come back as [`LabelVerdict::unanswered`];
/// a reply that mentions none of them is a structural error.
pub fn parse_label_response<S: AsRef<str>>(
    response: &str,
    keys: &[S],
) -> Result<Vec<(String, LabelVerdict)>> {
    let text = truncate_at(response, LIST_END);
    // ASCII folding keeps byte offsets identical between the two strings
    let folded = text.to_ascii_lowercase();

    let mut found = 0;
    let verdicts: Vec<(String, LabelVerdict)> = keys
        .iter()
        .map(|key| {
            let key = key.as_ref();
            let verdict = scan_key(text, &folded, key).inspect(|_| found += 1);
            (key.to_string(), verdict.unwrap_or_else(LabelVerdict::unanswered))
        })
        .collect();

    if !keys.is_empty() && found == 0 {
        return Err(ProtocolError::structural(
            "expected one ■key:【explanation】:VALUE■ line per label",
        ));
    }
    Ok(verdicts)
}
