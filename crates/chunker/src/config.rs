use serde::{Deserialize, Serialize};

/// Configuration for chunk packing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Token budget per chunk (soft limit, an oversized item may exceed it alone)
    pub budget_tokens: usize,

    /// Maximum number of items per chunk
    pub max_items_per_chunk: Option<usize>,

    /// Per-item ceiling; longer items are truncated before packing
    pub max_tokens_per_item: Option<usize>,

    /// Formatting overhead charged once per item (separators, indices)
    pub item_overhead_tokens: usize,

    /// Largest achievable chunk; an item above it cannot be processed at all
    pub hard_limit_tokens: Option<usize>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            budget_tokens: 16_000,
            max_items_per_chunk: None,
            max_tokens_per_item: None,
            item_overhead_tokens: 0,
            hard_limit_tokens: None,
        }
    }
}

impl ChunkerConfig {
    /// Default config with a specific budget
    #[must_use]
    pub fn with_budget(budget_tokens: usize) -> Self {
        Self {
            budget_tokens,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.budget_tokens == 0 {
            return Err("budget_tokens must be > 0".to_string());
        }

        if self.max_items_per_chunk == Some(0) {
            return Err("max_items_per_chunk must be > 0".to_string());
        }

        if self.max_tokens_per_item == Some(0) {
            return Err("max_tokens_per_item must be > 0".to_string());
        }

        if let Some(limit) = self.hard_limit_tokens {
            if limit < self.budget_tokens {
                return Err(format!(
                    "hard_limit_tokens ({limit}) cannot be below budget_tokens ({})",
                    self.budget_tokens
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(ChunkerConfig::default().validate().is_ok());
        assert!(ChunkerConfig::with_budget(1).validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ChunkerConfig::with_budget(0);
        assert!(config.validate().is_err());

        config.budget_tokens = 500;
        config.max_items_per_chunk = Some(0);
        assert!(config.validate().is_err());

        config.max_items_per_chunk = Some(10);
        config.hard_limit_tokens = Some(100);
        assert!(config.validate().is_err());

        config.hard_limit_tokens = Some(1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ChunkerConfig = serde_json::from_str(r#"{"budget_tokens": 42}"#).unwrap();
        assert_eq!(config.budget_tokens, 42);
        assert_eq!(config.item_overhead_tokens, 0);
        assert!(config.max_items_per_chunk.is_none());
    }
}
