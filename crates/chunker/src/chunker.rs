use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::item::Item;
use crate::tokenizer::Tokenizer;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A contiguous, non-empty run of item positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the plan
    pub index: usize,

    /// Item positions covered by this chunk
    pub range: Range<usize>,

    /// Sum of item tokens plus per-item overhead
    pub tokens: usize,
}

impl Chunk {
    #[must_use]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// The part of `items` this chunk covers
    #[must_use]
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.range.clone()]
    }
}

/// First-fit packer for ordered items
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker with a validated configuration
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate().map_err(ChunkerError::invalid_config)?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Pack items, given their token counts in order, into chunks.
    ///
    /// An item is added while `running + cost <= budget` and the chunk holds
    /// fewer than `max_items_per_chunk` items; otherwise the current chunk is
    /// closed first. An item whose cost alone exceeds the budget therefore
    /// ends up alone in its own chunk.
    pub fn plan(&self, token_counts: &[usize]) -> Result<Vec<Chunk>> {
        let budget = self.config.budget_tokens;
        let overhead = self.config.item_overhead_tokens;

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut running: usize = 0;

        for (pos, &tokens) in token_counts.iter().enumerate() {
            let cost = tokens.saturating_add(overhead);
            if let Some(limit) = self.config.hard_limit_tokens {
                if cost > limit {
                    return Err(ChunkerError::BudgetExceeded {
                        index: pos,
                        tokens: cost,
                        limit,
                    });
                }
            }

            let count = pos - start;
            let over_budget = running.saturating_add(cost) > budget;
            let over_items = self
                .config
                .max_items_per_chunk
                .is_some_and(|max| count >= max);
            if count > 0 && (over_budget || over_items) {
                chunks.push(Chunk {
                    index: chunks.len(),
                    range: start..pos,
                    tokens: running,
                });
                start = pos;
                running = 0;
            }

            if cost > budget {
                log::debug!("Item {pos} ({cost} tokens) exceeds the chunk budget of {budget}");
            }
            running = running.saturating_add(cost);
        }

        if start < token_counts.len() {
            chunks.push(Chunk {
                index: chunks.len(),
                range: start..token_counts.len(),
                tokens: running,
            });
        }

        Ok(chunks)
    }

    /// Plan chunks for prepared items
    pub fn chunk_items<T>(&self, items: &[Item<T>]) -> Result<Vec<Chunk>> {
        let counts: Vec<usize> = items.iter().map(|item| item.tokens).collect();
        self.plan(&counts)
    }
}

/// Slice a single text into pieces of at most `piece_tokens` tokens.
///
/// This is the token-stream fallback for one input too large for any chunk;
/// the pieces concatenate back to `text`.
pub fn split_tokens(text: &str, tokenizer: &dyn Tokenizer, piece_tokens: usize) -> Vec<String> {
    let tokens = tokenizer.split(text);
    if tokens.is_empty() {
        return vec![String::new()];
    }
    tokens
        .chunks(piece_tokens.max(1))
        .map(<[String]>::concat)
        .collect()
}
