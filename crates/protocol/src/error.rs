use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Upper bound on raw-response excerpts carried by errors
pub const EXCERPT_CHARS: usize = 200;

/// Closed taxonomy of user-visible failures
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    StructuralResponse,
    MissingCitation,
    Cancellation,
    BudgetExceeded,
    Backend,
    InvalidInput,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::StructuralResponse => "structural_response",
            Self::MissingCitation => "missing_citation",
            Self::Cancellation => "cancellation",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Backend => "backend",
            Self::InvalidInput => "invalid_input",
        }
    }

    /// Whether a corrective follow-up turn can fix this failure
    #[must_use]
    pub const fn is_correctable(self) -> bool {
        matches!(self, Self::StructuralResponse | Self::MissingCitation)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend reply that does not follow the expected protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Response does not match the expected format: {0}")]
    StructuralResponse(String),

    #[error("{0}")]
    MissingCitation(String),
}

impl ProtocolError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::StructuralResponse(msg.into())
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::StructuralResponse(_) => ErrorKind::StructuralResponse,
            Self::MissingCitation(_) => ErrorKind::MissingCitation,
        }
    }

    /// Follow-up message telling the model what to fix
    #[must_use]
    pub fn correction(&self) -> String {
        match self {
            Self::StructuralResponse(msg) => format!(
                "Your previous response could not be parsed: {msg}. \
                 Reply again using exactly the requested output format."
            ),
            Self::MissingCitation(msg) => format!(
                "{msg} Reply again with the same content and add the missing citations."
            ),
        }
    }
}

/// Serializable form of any failure, for JSON output
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            chunk: None,
            excerpt: None,
            hint: None,
        }
    }
}

/// First [`EXCERPT_CHARS`]-bounded slice of `text`, on a char boundary.
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kinds_serialize_snake_case() {
        let raw = serde_json::to_string(&ErrorKind::StructuralResponse).unwrap();
        assert_eq!(raw, "\"structural_response\"");
        assert_eq!(ErrorKind::BudgetExceeded.to_string(), "budget_exceeded");
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let envelope = ErrorEnvelope::new(ErrorKind::Cancellation, "Operation cancelled");
        let raw = serde_json::to_string(&envelope).unwrap();
        assert_eq!(raw, r#"{"code":"cancellation","message":"Operation cancelled"}"#);
    }

    #[test]
    fn excerpt_is_char_bounded() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("ééééé", 2), "éé…");
    }

    #[test]
    fn only_format_failures_are_correctable() {
        assert!(ProtocolError::structural("x").kind().is_correctable());
        assert!(!ErrorKind::Cancellation.is_correctable());
        assert!(!ErrorKind::Backend.is_correctable());
    }
}
