//! # Context Chunker
//!
//! Splits an ordered list of arbitrary items into token-bounded chunks so that
//! each chunk fits a single model call.
//!
//! ## Architecture
//!
//! ```text
//! Items (any serde value)
//!     │
//!     ├──> stringify (strings verbatim, everything else as pretty JSON)
//!     │
//!     ├──> Tokenizer::count / truncate (optional per-item ceiling)
//!     │
//!     └──> Chunker::plan
//!          ├─> first-fit: keep adding while running + next <= budget
//!          ├─> close the chunk at max_items_per_chunk
//!          └─> an oversized item is isolated in its own chunk
//! ```
//!
//! Chunks are contiguous position ranges: concatenating them in order gives
//! back the original item order, and every item lands in exactly one chunk.
//! A single input too large even on its own can be sliced at the token-stream
//! level with [`split_tokens`].
//!
//! ## Example
//!
//! ```rust
//! use context_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::with_budget(500)).unwrap();
//! let chunks = chunker.plan(&[50; 100]).unwrap();
//! assert_eq!(chunks.len(), 10);
//! assert!(chunks.iter().all(|chunk| chunk.len() == 10));
//! ```

mod chunker;
mod config;
mod error;
mod item;
mod tokenizer;

pub use chunker::{split_tokens, Chunk, Chunker};
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use item::{prepare_items, stringify, Item};
#[cfg(feature = "hf-tokenizer")]
pub use tokenizer::HfTokenizer;
pub use tokenizer::{HeuristicTokenizer, Tokenizer};
