use thiserror::Error;

/// Result type for chunker operations
pub type Result<T> = std::result::Result<T, ChunkerError>;

/// Errors that can occur while preparing or chunking items
#[derive(Error, Debug)]
pub enum ChunkerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single item cannot fit the largest achievable chunk
    #[error("Item {index} needs {tokens} tokens, above the hard limit of {limit}")]
    BudgetExceeded {
        index: usize,
        tokens: usize,
        limit: usize,
    },

    /// Failed to turn an item into text
    #[error("Failed to stringify item: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Tokenizer could not be loaded
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

impl ChunkerError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
