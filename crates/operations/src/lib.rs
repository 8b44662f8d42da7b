//! # Context Operations
//!
//! Task operations over collections larger than one model call, built on a
//! shared [`Session`].
//!
//! ## Architecture
//!
//! ```text
//! Session (backend, tokenizer, limits, usage, cancellation)
//!     │
//!     ├──> answer  chunk documents ──> dispatch ──> citation merge
//!     │                                     └─> consolidate over cited docs
//!     ├──> group   (elements x groups) ──> dispatch ──> registry apply
//!     │                                     └─> coverage passes ──> resolve
//!     ├──> patch   numbered <FILE> blocks ──> one call ──> micropatch apply
//!     └──> label   token slices ──> dispatch ──> yes-in-any-slice merge
//! ```
//!
//! Every operation returns an [`Outcome`] carrying its output, its share of
//! usage, elapsed time and the chunks that were left out of the merge.
//!
//! ## Example
//!
//! ```rust,no_run
//! use context_chunker::HeuristicTokenizer;
//! use context_operations::{AnswerOptions, Session};
//! use std::sync::Arc;
//!
//! # async fn demo(backend: Arc<dyn context_dispatch::Backend>) -> context_operations::Result<()> {
//! let session = Session::new(backend, Arc::new(HeuristicTokenizer::default()));
//! let docs = ["Paris is the capital of France."];
//! let outcome = session
//!     .answer(&docs, "What is the capital of France?", &AnswerOptions::default())
//!     .await?;
//! println!("{:?}", outcome.output);
//! # Ok(())
//! # }
//! ```

mod answer;
mod error;
mod group;
mod label;
mod patch;
mod prompts;
mod registry;
mod session;

pub use answer::{AnswerExample, AnswerOptions, DEFAULT_CHUNK_LENGTH};
pub use error::{OperationError, Result};
pub use group::{into_label_map, Group, GroupOptions, InitialGroup, FALLBACK_GROUP};
pub use label::{validate_labels, LabelExample, LabelOptions, LabelResult};
pub use patch::{FileInput, PatchedFile};
pub use registry::{GroupRegistry, NewGroups};
pub use session::{ModelLimits, Outcome, Session, PROMPT_INPUT_BUFFER, PROMPT_OUTPUT_BUFFER};

pub use context_protocol::{AnswerResult, Citation, ErrorEnvelope, ErrorKind, LabelValue, LabelVerdict};
