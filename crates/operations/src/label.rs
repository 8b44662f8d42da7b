//! Yes/no tagging of one input against several label questions.
//!
//! Inputs too large for one call are sliced at the token-stream level and
//! every slice is tagged on its own. A label that holds in any slice holds
//! for the whole input.

use crate::error::{OperationError, Result};
use crate::prompts;
use crate::session::{clamp, Outcome, Session};
use context_chunker::{split_tokens, stringify};
use context_dispatch::{ChunkFailure, ChunkTask, GenerateRequest, Message};
use context_protocol::{
    format_label_line, parse_label_response, LabelValue, LabelVerdict, ProtocolError, LIST_END,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const MAX_KEY_CHARS: usize = 250;

/// Tokens added per example turn for message framing
const EXAMPLE_OVERHEAD_TOKENS: usize = 100;

/// A past input with the verdicts an expert gave it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelExample {
    pub input: String,
    pub labels: BTreeMap<String, LabelVerdict>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelOptions {
    pub instructions: Option<String>,
    pub chunk_length: usize,
    pub examples: Vec<LabelExample>,
}

impl Default for LabelOptions {
    fn default() -> Self {
        Self {
            instructions: None,
            chunk_length: 16_000,
            examples: Vec::new(),
        }
    }
}

impl LabelOptions {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(100..=100_000).contains(&self.chunk_length) {
            return Err(format!(
                "chunk_length must be between 100 and 100000, got {}",
                self.chunk_length
            ));
        }
        Ok(())
    }
}

/// Final verdict for one label key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelResult {
    pub explanation: String,
    pub value: bool,
    pub confidence: f64,
    pub label: LabelValue,
}

impl From<LabelVerdict> for LabelResult {
    fn from(verdict: LabelVerdict) -> Self {
        Self {
            value: verdict.value.is_yes(),
            confidence: verdict.value.confidence(),
            label: verdict.value,
            explanation: verdict.explanation,
        }
    }
}

/// Check `(key, question)` pairs: keys are `[A-Za-z0-9_]{1,250}` and unique
pub fn validate_labels(labels: &[(String, String)]) -> std::result::Result<(), String> {
    if labels.is_empty() {
        return Err("at least one label is required".to_string());
    }
    let mut keys = HashSet::new();
    for (key, question) in labels {
        let valid = !key.is_empty()
            && key.len() <= MAX_KEY_CHARS
            && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
        if !valid {
            return Err(format!(
                "label key '{key}' must be 1-{MAX_KEY_CHARS} letters, digits or underscores"
            ));
        }
        if !keys.insert(key.as_str()) {
            return Err(format!("duplicate label key '{key}'"));
        }
        if question.trim().is_empty() {
            return Err(format!("label '{key}' has an empty question"));
        }
    }
    Ok(())
}

struct LabelTask {
    system: String,
    format: String,
    keys: Vec<String>,
    examples: Vec<Message>,
    max_tokens: usize,
}

impl ChunkTask for LabelTask {
    type Chunk = String;
    type Output = Vec<(String, LabelVerdict)>;

    fn request(&self, piece: &String) -> GenerateRequest {
        let mut messages = self.examples.clone();
        messages.push(Message::user(prompts::label_user(piece, &self.format)));
        GenerateRequest {
            system: self.system.clone(),
            messages,
            stop_sequences: vec![LIST_END.to_string()],
            max_tokens: self.max_tokens,
        }
    }

    fn parse(&self, _piece: &String, reply: &str) -> std::result::Result<Self::Output, ProtocolError> {
        parse_label_response(reply, &self.keys)
    }
}

/// First verdict that says yes, else the first verdict, per key
fn merge_pieces(
    keys: &[String],
    pieces: Vec<Vec<(String, LabelVerdict)>>,
) -> BTreeMap<String, LabelResult> {
    let mut merged: BTreeMap<String, LabelVerdict> = BTreeMap::new();
    for piece in pieces {
        for (key, verdict) in piece {
            match merged.get(&key) {
                Some(current) if current.value.is_yes() || !verdict.value.is_yes() => {}
                _ => {
                    merged.insert(key, verdict);
                }
            }
        }
    }
    keys.iter()
        .map(|key| {
            let verdict = merged.remove(key).unwrap_or_else(LabelVerdict::unanswered);
            (key.clone(), verdict.into())
        })
        .collect()
}

impl Session {
    /// Answer each `(key, question)` label for `input`.
    pub async fn label<T: Serialize + ?Sized>(
        &self,
        input: &T,
        labels: &[(String, String)],
        options: &LabelOptions,
    ) -> Result<Outcome<BTreeMap<String, LabelResult>>> {
        options.validate().map_err(OperationError::invalid_input)?;
        validate_labels(labels).map_err(OperationError::invalid_input)?;
        self.track("label", self.label_inner(input, labels, options)).await
    }

    async fn label_inner<T: Serialize + ?Sized>(
        &self,
        input: &T,
        labels: &[(String, String)],
        options: &LabelOptions,
    ) -> Result<(BTreeMap<String, LabelResult>, Vec<ChunkFailure>)> {
        let text = stringify(input)?;
        let total = clamp(options.chunk_length, 1_000, self.input_window());
        let example_budget = clamp(total / 2, 250, 10_000);
        let input_budget = clamp(total.saturating_sub(example_budget), total / 2, total);

        let format = prompts::label_format(labels);
        let keys: Vec<String> = labels.iter().map(|(key, _)| key.clone()).collect();
        let task = LabelTask {
            system: prompts::label_system(&format, options.instructions.as_deref()),
            examples: self.label_examples(&options.examples, &keys, &format, example_budget),
            format,
            keys,
            max_tokens: self.limits().max_output_tokens,
        };

        let pieces = if self.count(&text) > input_budget {
            let pieces = split_tokens(&text, self.tokenizer(), input_budget.max(1));
            log::info!("Input too large for one call, labelling {} slices", pieces.len());
            pieces
        } else {
            vec![text]
        };

        let (outputs, gaps) = self.dispatcher()?.run(&task, &pieces).await?.into_parts();
        if outputs.is_empty() {
            if let Some(first) = gaps.into_iter().next() {
                return Err(first.into());
            }
            return Ok((merge_pieces(&task.keys, Vec::new()), Vec::new()));
        }
        let verdicts = outputs.into_iter().map(|(_, verdicts)| verdicts).collect();
        Ok((merge_pieces(&task.keys, verdicts), gaps))
    }

    /// Example turns in label-protocol form, kept while they fit `budget`
    fn label_examples(
        &self,
        examples: &[LabelExample],
        keys: &[String],
        format: &str,
        budget: usize,
    ) -> Vec<Message> {
        let mut spent = 0;
        let mut messages = Vec::new();
        for example in examples {
            let user = prompts::label_user(&example.input, format);
            let mut reply: Vec<String> = keys
                .iter()
                .filter_map(|key| {
                    example
                        .labels
                        .get(key)
                        .map(|verdict| format_label_line(key, &verdict.explanation, verdict.value))
                })
                .collect();
            if reply.is_empty() {
                continue;
            }
            reply.push(LIST_END.to_string());
            let reply = reply.join("\n");

            let cost = self.count(&user) + self.count(&reply) + EXAMPLE_OVERHEAD_TOKENS;
            if spent + cost > budget {
                log::debug!("Dropping label examples beyond {budget} tokens");
                break;
            }
            spent += cost;
            messages.push(Message::user(user));
            messages.push(Message::assistant(reply));
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pair(key: &str, question: &str) -> (String, String) {
        (key.to_string(), question.to_string())
    }

    fn verdict(key: &str, value: LabelValue) -> (String, LabelVerdict) {
        (
            key.to_string(),
            LabelVerdict {
                explanation: format!("{key} is {value}"),
                value,
            },
        )
    }

    #[test]
    fn label_keys_are_checked() {
        assert!(validate_labels(&[pair("is_spam", "Is it spam?")]).is_ok());
        assert!(validate_labels(&[]).is_err());
        assert!(validate_labels(&[pair("bad key", "?")]).is_err());
        assert!(validate_labels(&[pair("a", "x"), pair("a", "y")]).is_err());
        assert!(validate_labels(&[pair("a", " ")]).is_err());
        assert!(validate_labels(&[pair(&"k".repeat(251), "x")]).is_err());
    }

    #[test]
    fn yes_in_any_piece_wins() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let merged = merge_pieces(
            &keys,
            vec![
                vec![verdict("a", LabelValue::AbsolutelyNot), verdict("b", LabelValue::ProbablyNot)],
                vec![verdict("a", LabelValue::ProbablyYes), verdict("b", LabelValue::Ambiguous)],
                vec![verdict("a", LabelValue::AbsolutelyYes), verdict("b", LabelValue::AbsolutelyNot)],
            ],
        );
        assert!(merged["a"].value);
        assert_eq!(merged["a"].label, LabelValue::ProbablyYes);
        assert_eq!(merged["a"].confidence, 0.5);
        assert!(!merged["b"].value);
        assert_eq!(merged["b"].label, LabelValue::ProbablyNot);
    }

    #[test]
    fn missing_keys_are_unanswered() {
        let keys = vec!["a".to_string()];
        let merged = merge_pieces(&keys, Vec::new());
        assert_eq!(merged["a"].label, LabelValue::Ambiguous);
        assert!(!merged["a"].value);
    }

    #[test]
    fn test_default_options_valid() {
        assert!(LabelOptions::default().validate().is_ok());
    }
}
