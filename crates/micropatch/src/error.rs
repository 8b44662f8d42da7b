use thiserror::Error;

/// Result type for patch operations
pub type Result<T> = std::result::Result<T, PatchError>;

/// Structural errors found while parsing patch text.
///
/// Every variant carries the 1-based line of the ops text that caused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// A marker line that does not follow the op grammar
    #[error("Invalid op syntax at line {line}: {text}")]
    InvalidSyntax { line: usize, text: String },

    /// Line number below 1, range end before start, or an unrepresentable number
    #[error("Invalid line/range at line {line}: {text}")]
    InvalidAddress { line: usize, text: String },

    /// `<` or `>` used with a range
    #[error("Insert cannot target a range (line {line})")]
    InsertWithRange { line: usize },

    /// `-` followed by a non-empty payload
    #[error("Delete must not have a payload (line {line})")]
    DeleteWithPayload { line: usize },
}

impl PatchError {
    /// Line of the ops text that failed to parse
    #[must_use]
    pub const fn source_line(&self) -> usize {
        match self {
            Self::InvalidSyntax { line, .. }
            | Self::InvalidAddress { line, .. }
            | Self::InsertWithRange { line }
            | Self::DeleteWithPayload { line } => *line,
        }
    }
}
