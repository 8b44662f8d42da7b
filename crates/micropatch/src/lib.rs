//! # Context Micropatch
//!
//! A tiny engine that parses and applies ultra-compact, line-addressed patches
//! written by language models.
//!
//! ## Philosophy
//!
//! Patches are always author-specified; the engine never diffs two texts.
//! Every op addresses lines by their ORIGINAL 1-based number, so an author can
//! write ops against the numbered view they were shown without tracking how
//! earlier ops shift the buffer.
//!
//! ## Protocol
//!
//! ```text
//! ◼︎<N|text        insert a single line BEFORE original line N
//! ◼︎>N|text        insert a single line AFTER original line N
//! ◼︎=N|lines       replace line N (payload may span several raw lines)
//! ◼︎=N-M|lines     replace the inclusive range N..M
//! ◼︎-N             delete line N
//! ◼︎-N-M           delete the inclusive range N..M
//! ```
//!
//! A multiline `=` payload continues until the next line that starts with the
//! marker, or the end of input. `\◼︎` inside a payload decodes to a literal
//! marker; no other escapes exist.
//!
//! ## Application order
//!
//! ```text
//! ops (any author order)
//!     │
//!     ├──> single deletes   (descending)
//!     ├──> range deletes    (descending by start)
//!     ├──> single replaces  (ascending)
//!     ├──> range replaces   (ascending by start)
//!     ├──> insert-before    (ascending)
//!     └──> insert-after     (ascending)
//! ```
//!
//! An [`AddressMap`] keeps original addresses valid while the buffer shifts.
//! Ops whose target no longer maps (already deleted, out of bounds) are
//! skipped, so re-applying a patch is safe.
//!
//! ## Example
//!
//! ```rust
//! use context_micropatch::apply_text;
//!
//! let patched = apply_text("line1\nline2\nline3\n", "◼︎-2", None).unwrap();
//! assert_eq!(patched, "line1\nline3\n");
//! ```

mod apply;
mod buffer;
mod eol;
mod error;
mod op;
mod parser;

pub use apply::{apply_ops, AddressMap, Span};
pub use buffer::{render_numbered, Micropatch};
pub use eol::Eol;
pub use error::{PatchError, Result};
pub use op::{canonicalize, PatchOp};
pub use parser::{parse_ops, validate};

/// Marker glyph that starts every op line (U+25FC followed by U+FE0E).
pub const MARKER: &str = "\u{25FC}\u{FE0E}";

/// Escaped form of [`MARKER`] inside payloads.
pub const ESCAPED_MARKER: &str = "\\\u{25FC}\u{FE0E}";

/// One-shot convenience: parse `ops_text` and apply it to `source`.
///
/// The line-ending style is auto-detected from `source` unless `eol` is given.
pub fn apply_text(source: &str, ops_text: &str, eol: Option<Eol>) -> Result<String> {
    let mut buffer = Micropatch::new(source);
    if let Some(eol) = eol {
        buffer = buffer.with_eol(eol);
    }
    buffer.apply(ops_text)
}
