//! # Context Dispatch
//!
//! Runs one backend conversation per chunk under a bounded worker pool.
//!
//! ## Architecture
//!
//! ```text
//! chunks ──> stream::iter ──> buffered(concurrency) ──> DispatchReport (chunk order)
//!                │
//!                └─> per chunk: Attempt state machine
//!                      ├─> Backend::generate (raced against the CancellationToken)
//!                      │     └─> transport error: fixed delay, re-send
//!                      ├─> ChunkTask::parse
//!                      │     └─> malformed: history + reply + correction, retry
//!                      └─> UsageCounter (append-only, shared)
//! ```
//!
//! Cancellation is cooperative: the token is checked before each chunk and
//! each call, and every in-flight call is raced against it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use context_dispatch::{ChunkTask, DispatchConfig, Dispatcher, GenerateRequest};
//! use context_protocol::ProtocolError;
//! # async fn demo(backend: std::sync::Arc<dyn context_dispatch::Backend>) -> context_dispatch::Result<()> {
//! struct Shout;
//!
//! impl ChunkTask for Shout {
//!     type Chunk = String;
//!     type Output = String;
//!
//!     fn request(&self, chunk: &String) -> GenerateRequest {
//!         GenerateRequest::new("Repeat in upper case.", chunk.clone())
//!     }
//!
//!     fn parse(&self, _chunk: &String, reply: &str) -> Result<String, ProtocolError> {
//!         Ok(reply.to_uppercase())
//!     }
//! }
//!
//! let dispatcher = Dispatcher::new(backend, DispatchConfig::default())?;
//! let report = dispatcher.run(&Shout, &["a".to_string(), "b".to_string()]).await?;
//! assert_eq!(report.len(), 2);
//! # Ok(())
//! # }
//! ```

mod attempt;
mod backend;
mod config;
mod dispatcher;
mod error;
mod usage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use attempt::Attempt;
pub use backend::{Backend, CallUsage, GenerateRequest, Generation, Message, Role};
pub use config::{DispatchConfig, RetryPolicy};
pub use dispatcher::{ChunkTask, DispatchReport, Dispatcher};
pub use error::{BackendError, ChunkFailure, DispatchError, Result};
pub use tokio_util::sync::CancellationToken;
pub use usage::{RequestUsage, TokenUsage, Usage, UsageCounter};
