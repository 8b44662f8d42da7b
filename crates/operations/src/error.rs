use context_chunker::ChunkerError;
use context_dispatch::{ChunkFailure, DispatchError};
use context_micropatch::PatchError;
use context_protocol::{ErrorEnvelope, ErrorKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OperationError>;

/// The one user-visible failure of an operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub chunk: Option<usize>,
    pub message: String,
    pub excerpt: Option<String>,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            chunk: None,
            message: message.into(),
            excerpt: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BudgetExceeded, message)
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.kind,
            message: self.message.clone(),
            chunk: self.chunk,
            excerpt: self.excerpt.clone(),
            hint: hint_for(self.kind).map(str::to_string),
        }
    }
}

fn hint_for(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::BudgetExceeded => Some("Split the input or raise max_input_tokens"),
        ErrorKind::Backend => Some("Check the backend URL, model and API key"),
        ErrorKind::StructuralResponse | ErrorKind::MissingCitation => {
            Some("Raise max_retries or try a stronger model")
        }
        ErrorKind::Parse | ErrorKind::Cancellation | ErrorKind::InvalidInput => None,
    }
}

impl From<ChunkFailure> for OperationError {
    fn from(failure: ChunkFailure) -> Self {
        Self {
            kind: failure.kind,
            chunk: Some(failure.chunk),
            message: failure.message,
            excerpt: failure.excerpt,
        }
    }
}

impl From<DispatchError> for OperationError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Chunk(failure) => failure.into(),
            other => Self::new(other.kind(), other.to_string()),
        }
    }
}

impl From<ChunkerError> for OperationError {
    fn from(err: ChunkerError) -> Self {
        let kind = match err {
            ChunkerError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            ChunkerError::InvalidConfig(_)
            | ChunkerError::Serialize(_)
            | ChunkerError::Tokenizer(_) => ErrorKind::InvalidInput,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<PatchError> for OperationError {
    fn from(err: PatchError) -> Self {
        Self::new(ErrorKind::Parse, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chunk_failure_keeps_index_and_excerpt() {
        let err = OperationError::from(DispatchError::Chunk(ChunkFailure {
            chunk: 4,
            kind: ErrorKind::MissingCitation,
            message: "no citations".into(),
            excerpt: Some("■answer hi".into()),
        }));
        assert_eq!(err.kind(), ErrorKind::MissingCitation);
        assert_eq!(err.chunk, Some(4));

        let envelope = err.to_envelope();
        assert_eq!(envelope.chunk, Some(4));
        assert_eq!(envelope.excerpt.as_deref(), Some("■answer hi"));
        assert!(envelope.hint.is_some());
    }

    #[test]
    fn cancellation_maps_to_its_kind() {
        let err = OperationError::from(DispatchError::Cancelled);
        assert_eq!(err.kind(), ErrorKind::Cancellation);
        assert_eq!(err.message, "Operation cancelled");
    }

    #[test]
    fn chunker_budget_maps_to_budget_exceeded() {
        let err = OperationError::from(ChunkerError::BudgetExceeded {
            index: 0,
            tokens: 10,
            limit: 5,
        });
        assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
    }
}
