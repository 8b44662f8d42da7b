use context_protocol::{ErrorEnvelope, ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failure reported by a [`Backend`](crate::Backend) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network failure, rate limit or server error; worth re-sending
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend refused the request; re-sending will not help
    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    #[error("Backend call cancelled")]
    Cancelled,
}

/// Terminal failure of one chunk after all retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk: usize,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl ChunkFailure {
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.kind,
            message: self.message.clone(),
            chunk: Some(self.chunk),
            excerpt: self.excerpt.clone(),
            hint: None,
        }
    }
}

impl std::fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk {} failed ({}): {}", self.chunk, self.kind, self.message)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Chunk(ChunkFailure),

    #[error("Invalid dispatch configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancellation,
            Self::Chunk(failure) => failure.kind,
            Self::InvalidConfig(_) => ErrorKind::InvalidInput,
        }
    }
}
