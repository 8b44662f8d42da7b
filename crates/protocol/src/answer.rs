//! Citation answer protocol.
//!
//! ```text
//! ■answer
//! Botpress was founded in 2016■002 and is based in Quebec■003.
//! ■end■
//! ```
//!
//! Ambiguous replies carry `■ambiguous`, `■follow_up` and several `■answer`
//! sections. Inline citations are `■NNN` or `■NNN-MMM`.

use crate::error::{ProtocolError, Result};
use crate::numbered::NumberedView;
use crate::{
    truncate_at, AMBIGUOUS_START, ANSWER_END, ANSWER_START, FOLLOW_UP_START, GLYPH,
    INVALID_QUESTION_START, MISSING_KNOWLEDGE_START, OUT_OF_TOPIC_START,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Most interpretations kept from an ambiguous reply
pub const MAX_AMBIGUOUS_ANSWERS: usize = 3;

/// A cited span of source lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Citation {
    /// Byte offset into the clean answer text (always a char boundary)
    pub offset: usize,
    /// Index of the cited document in the caller's original list
    pub item: usize,
    /// Cited lines of that document, joined with `\n`
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnswerWithCitations {
    pub answer: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerResult {
    Answer {
        answer: String,
        citations: Vec<Citation>,
    },
    Ambiguous {
        ambiguity: String,
        follow_up: String,
        answers: Vec<AnswerWithCitations>,
    },
    OutOfTopic {
        reason: String,
    },
    InvalidQuestion {
        reason: String,
    },
    MissingKnowledge {
        reason: String,
    },
}

impl AnswerResult {
    pub fn missing_knowledge(reason: impl Into<String>) -> Self {
        Self::MissingKnowledge {
            reason: reason.into(),
        }
    }

    pub fn invalid_question(reason: impl Into<String>) -> Self {
        Self::InvalidQuestion {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_answer(&self) -> bool {
        matches!(self, Self::Answer { .. })
    }

    /// Citations across every answer section
    #[must_use]
    pub fn citations(&self) -> Vec<&Citation> {
        match self {
            Self::Answer { citations, .. } => citations.iter().collect(),
            Self::Ambiguous { answers, .. } => answers
                .iter()
                .flat_map(|answer| answer.citations.iter())
                .collect(),
            Self::OutOfTopic { .. } | Self::InvalidQuestion { .. } | Self::MissingKnowledge { .. } => {
                Vec::new()
            }
        }
    }
}

/// A citation marker as found in the text, before line resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCitation {
    pub offset: usize,
    pub start: usize,
    pub end: usize,
}

/// Remove every `■NNN` / `■NNN-MMM` marker from `text`.
///
/// Returns the trimmed clean text and the markers with offsets into it,
/// de-duplicated by offset and line range.
#[must_use]
pub fn strip_citation_markers(text: &str) -> (String, Vec<RawCitation>) {
    let mut clean = String::with_capacity(text.len());
    let mut raw: Vec<RawCitation> = Vec::new();

    let mut rest = text;
    while let Some(pos) = rest.find(GLYPH) {
        clean.push_str(&rest[..pos]);
        let after = &rest[pos + GLYPH.len_utf8()..];

        let Some((start_digits, tail)) = split_digits(after) else {
            clean.push(GLYPH);
            rest = after;
            continue;
        };
        let (end_digits, tail) = match tail.strip_prefix('-').and_then(split_digits) {
            Some((digits, tail)) => (Some(digits), tail),
            None => (None, tail),
        };

        let start = start_digits.parse::<usize>().ok();
        let end = match end_digits {
            Some(digits) => digits.parse::<usize>().ok(),
            None => start,
        };
        if let (Some(start), Some(end)) = (start, end) {
            let citation = RawCitation {
                offset: clean.len(),
                start,
                end: end.max(start),
            };
            if !raw.contains(&citation) {
                raw.push(citation);
            }
        }
        rest = tail;
    }
    clean.push_str(rest);

    let leading = clean.len() - clean.trim_start().len();
    let trimmed = clean.trim().to_string();
    for citation in &mut raw {
        citation.offset = citation.offset.saturating_sub(leading).min(trimmed.len());
    }
    (trimmed, raw)
}

fn split_digits(input: &str) -> Option<(&str, &str)> {
    let len = input.bytes().take_while(u8::is_ascii_digit).count();
    (len > 0).then(|| input.split_at(len))
}

/// Resolve markers against the view: one citation per cited document,
/// sorted by offset.
fn resolve_citations(raw: &[RawCitation], view: &NumberedView) -> Vec<Citation> {
    let mut citations = Vec::new();
    for marker in raw {
        let mut by_document: Vec<(usize, usize, Vec<&str>)> = Vec::new();
        for mapping in view.lines(marker.start, marker.end) {
            match by_document.iter_mut().find(|(doc, _, _)| *doc == mapping.document) {
                Some((_, _, lines)) => lines.push(&mapping.text),
                None => by_document.push((mapping.document, mapping.item, vec![&mapping.text])),
            }
        }
        if by_document.is_empty() {
            log::debug!(
                "Citation ■{}-{} does not match any numbered line",
                marker.start,
                marker.end
            );
        }
        citations.extend(by_document.into_iter().map(|(_, item, lines)| Citation {
            offset: marker.offset,
            item,
            snippet: lines.join("\n"),
        }));
    }
    citations.sort_by_key(|citation| citation.offset);
    citations
}

fn cited_answer(body: &str, view: &NumberedView) -> AnswerWithCitations {
    let (answer, raw) = strip_citation_markers(body.trim());
    let citations = resolve_citations(&raw, view);
    AnswerWithCitations { answer, citations }
}

/// Text after `marker` up to the next section marker (or the end)
fn section_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let body = &text[start..];
    let end = body.find(ANSWER_START).unwrap_or(body.len());
    Some(body[..end].trim())
}

fn reason_after(text: &str, marker: &str, fallback: &str) -> String {
    text.find(marker)
        .map(|pos| text[pos + marker.len()..].trim())
        .filter(|reason| !reason.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Parse one reply of the citation answer protocol against the view it
/// was asked about.
pub fn parse_answer_response(response: &str, view: &NumberedView) -> Result<AnswerResult> {
    let text = truncate_at(response, ANSWER_END).trim();
    let answer_count = text.matches(ANSWER_START).count();

    if text.contains(AMBIGUOUS_START) || answer_count >= 2 {
        return parse_ambiguous(text, view);
    }

    if answer_count == 1 {
        let Some(body) = text.find(ANSWER_START).map(|pos| &text[pos + ANSWER_START.len()..]) else {
            return Err(ProtocolError::structural("missing ■answer section"));
        };
        let AnswerWithCitations { answer, citations } = cited_answer(body, view);
        if citations.is_empty() {
            return Err(ProtocolError::MissingCitation(
                "Answer must include citations using the ■NNN format (e.g. ■001, ■001-005). \
                 Every statement must be backed by a citation to the numbered source lines."
                    .to_string(),
            ));
        }
        return Ok(AnswerResult::Answer { answer, citations });
    }

    if text.contains(OUT_OF_TOPIC_START) {
        return Ok(AnswerResult::OutOfTopic {
            reason: reason_after(
                text,
                OUT_OF_TOPIC_START,
                "The question is not related to the provided documents.",
            ),
        });
    }
    if text.contains(INVALID_QUESTION_START) {
        return Ok(AnswerResult::InvalidQuestion {
            reason: reason_after(
                text,
                INVALID_QUESTION_START,
                "The question is invalid or malformed.",
            ),
        });
    }
    if text.contains(MISSING_KNOWLEDGE_START) {
        return Ok(AnswerResult::MissingKnowledge {
            reason: reason_after(
                text,
                MISSING_KNOWLEDGE_START,
                "The documents do not contain sufficient information to answer the question.",
            ),
        });
    }

    Err(ProtocolError::structural(
        "the reply must start with one of ■answer, ■ambiguous, ■out_of_topic, \
         ■invalid_question or ■missing_knowledge",
    ))
}

fn parse_ambiguous(text: &str, view: &NumberedView) -> Result<AnswerResult> {
    let ambiguity = text
        .find(AMBIGUOUS_START)
        .map(|pos| {
            let body = &text[pos + AMBIGUOUS_START.len()..];
            let end = body
                .find(FOLLOW_UP_START)
                .or_else(|| body.find(ANSWER_START))
                .unwrap_or(body.len());
            body[..end].trim()
        })
        .filter(|s| !s.is_empty())
        .unwrap_or("The question has multiple interpretations.")
        .to_string();

    let follow_up = section_after(text, FOLLOW_UP_START)
        .filter(|s| !s.is_empty())
        .unwrap_or("Please clarify your question.")
        .to_string();

    let answers: Vec<AnswerWithCitations> = text
        .split(ANSWER_START)
        .skip(1)
        .map(|body| cited_answer(body, view))
        .collect();

    if answers.len() < 2 {
        return Err(ProtocolError::structural(
            "an ambiguous reply must contain at least two ■answer sections",
        ));
    }
    if answers.iter().any(|answer| answer.citations.is_empty()) {
        return Err(ProtocolError::MissingCitation(
            "Each answer in an ambiguous response must include citations using the ■NNN format \
             (e.g. ■001, ■001-005)."
                .to_string(),
        ));
    }

    Ok(AnswerResult::Ambiguous {
        ambiguity,
        follow_up,
        answers: answers.into_iter().take(MAX_AMBIGUOUS_ANSWERS).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::numbered::number_lines;
    use pretty_assertions::assert_eq;

    fn view() -> NumberedView {
        number_lines(&[
            (0, "Botpress is a chatbot platform.\nIt was founded in 2016."),
            (1, "The headquarters are in Quebec."),
        ])
    }

    #[test]
    fn parses_cited_answer() {
        let result = parse_answer_response(
            "■answer\nBotpress was founded in 2016■002 and is based in Quebec■003.\n■end■",
            &view(),
        )
        .unwrap();

        let AnswerResult::Answer { answer, citations } = result else {
            panic!("expected an answer");
        };
        assert_eq!(answer, "Botpress was founded in 2016 and is based in Quebec.");
        assert_eq!(
            citations,
            vec![
                Citation {
                    offset: 28,
                    item: 0,
                    snippet: "It was founded in 2016.".into()
                },
                Citation {
                    offset: 51,
                    item: 1,
                    snippet: "The headquarters are in Quebec.".into()
                },
            ]
        );
        assert_eq!(&answer[..28], "Botpress was founded in 2016");
    }

    #[test]
    fn range_citation_groups_lines_per_document() {
        let result = parse_answer_response("■answer Facts■001-003", &view()).unwrap();
        let citations = result.citations();
        assert_eq!(citations.len(), 2);
        assert_eq!(
            citations[0].snippet,
            "Botpress is a chatbot platform.\nIt was founded in 2016."
        );
        assert_eq!(citations[1].item, 1);
        assert!(citations.iter().all(|c| c.offset == 5));
    }

    #[test]
    fn answer_without_citation_is_an_error() {
        let err = parse_answer_response("■answer It exists.", &view()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCitation);

        let err = parse_answer_response("■answer Nowhere■999", &view()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCitation);
    }

    #[test]
    fn two_answers_mean_ambiguous() {
        let text = "■ambiguous Founding vs launch\n■follow_up Which date?\n\
                    ■answer Founded 2016■002\n■answer Platform■001\n■answer Quebec■003\n■answer Extra■001";
        let AnswerResult::Ambiguous {
            ambiguity,
            follow_up,
            answers,
        } = parse_answer_response(text, &view()).unwrap()
        else {
            panic!("expected ambiguous");
        };
        assert_eq!(ambiguity, "Founding vs launch");
        assert_eq!(follow_up, "Which date?");
        assert_eq!(answers.len(), 3);
        assert_eq!(answers[0].answer, "Founded 2016");

        let implicit = parse_answer_response("■answer A■001\n■answer B■003", &view()).unwrap();
        assert!(matches!(implicit, AnswerResult::Ambiguous { answers, .. } if answers.len() == 2));
    }

    #[test]
    fn ambiguous_with_one_interpretation_is_structural() {
        let text = "■ambiguous Founding vs launch\n■follow_up Which date?\n■answer Founded 2016■002";
        let err = parse_answer_response(text, &view()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuralResponse);

        let bare = parse_answer_response("■ambiguous Unclear\n■follow_up Which one?", &view()).unwrap_err();
        assert_eq!(bare.kind(), ErrorKind::StructuralResponse);
    }

    #[test]
    fn non_answer_sections() {
        let out = parse_answer_response("■out_of_topic This is about cooking.", &view()).unwrap();
        assert_eq!(
            out,
            AnswerResult::OutOfTopic {
                reason: "This is about cooking.".into()
            }
        );

        let missing = parse_answer_response("■missing_knowledge", &view()).unwrap();
        assert!(matches!(missing, AnswerResult::MissingKnowledge { reason } if !reason.is_empty()));

        let invalid = parse_answer_response("■invalid_question gibberish", &view()).unwrap();
        assert!(matches!(invalid, AnswerResult::InvalidQuestion { .. }));
    }

    #[test]
    fn unrecognized_reply_is_structural() {
        let err = parse_answer_response("I think the answer is 2016.", &view()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuralResponse);
    }

    #[test]
    fn strips_every_marker() {
        let (clean, raw) = strip_citation_markers("■001 Lead. Mid■002■002 end■004-005 ■ x");
        assert_eq!(clean, "Lead. Mid end ■ x");
        assert_eq!(
            raw,
            vec![
                RawCitation { offset: 0, start: 1, end: 1 },
                RawCitation { offset: 9, start: 2, end: 2 },
                RawCitation { offset: 13, start: 4, end: 5 },
            ]
        );
        assert!(!clean.contains("■0"));
    }
}
