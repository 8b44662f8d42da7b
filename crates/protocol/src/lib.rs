//! Line-oriented wire protocols exchanged with the generation backend.
//!
//! Every protocol here is ASCII plus one reserved glyph (`■`, U+25A0); no
//! other characters carry structural meaning. Parsers are single-pass
//! scanners that return a [`ProtocolError`] the dispatcher can turn into a
//! corrective follow-up turn.

pub mod answer;
pub mod error;
pub mod files;
pub mod group;
pub mod label;
pub mod numbered;

pub use answer::{
    parse_answer_response, strip_citation_markers, AnswerResult, AnswerWithCitations, Citation,
    RawCitation,
};
pub use error::{excerpt, ErrorEnvelope, ErrorKind, ProtocolError, Result, EXCERPT_CHARS};
pub use files::{format_file_block, parse_file_blocks, FileBlock};
pub use group::{format_group_elements, normalize_label, parse_assignments, Assignment};
pub use label::{format_label_line, parse_label_response, LabelValue, LabelVerdict};
pub use numbered::{number_lines, LineMapping, NumberedView};

/// Reserved glyph that starts every structural token
pub const GLYPH: char = '■';

pub const ANSWER_START: &str = "■answer";
pub const AMBIGUOUS_START: &str = "■ambiguous";
pub const FOLLOW_UP_START: &str = "■follow_up";
pub const OUT_OF_TOPIC_START: &str = "■out_of_topic";
pub const INVALID_QUESTION_START: &str = "■invalid_question";
pub const MISSING_KNOWLEDGE_START: &str = "■missing_knowledge";

/// Stop sequence of the answer protocol
pub const ANSWER_END: &str = "■end■";

/// Stop sequence of the group and label protocols
pub const LIST_END: &str = "■END■";

/// Cut `text` at the first occurrence of `marker`, or at a trailing
/// marker prefix the backend was stopped inside of.
#[must_use]
pub fn truncate_at<'a>(text: &'a str, marker: &str) -> &'a str {
    if let Some(pos) = text.find(marker) {
        return &text[..pos];
    }
    let head = marker.trim_end_matches(GLYPH);
    if !head.is_empty() {
        if let Some(pos) = text.rfind(head) {
            if text[pos + head.len()..].trim().is_empty() {
                return &text[..pos];
            }
        }
    }
    text
}
