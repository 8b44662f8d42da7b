//! Question answering with line citations over any number of documents.
//!
//! Documents that fit the budget are answered in one call. Otherwise they
//! are chunked, every chunk answers independently, and the partial results
//! are merged: a lone answer wins outright, several answers are
//! consolidated by asking again over only the documents they cite.

use crate::error::{OperationError, Result};
use crate::prompts;
use crate::session::{percent, Outcome, Session};
use context_chunker::{stringify, Chunker, ChunkerConfig};
use context_dispatch::{ChunkFailure, ChunkTask, Dispatcher, GenerateRequest, Message};
use context_protocol::{
    number_lines, parse_answer_response, AnswerResult, NumberedView, ProtocolError, ANSWER_END,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_CHUNK_LENGTH: usize = 16_000;

/// Share of the chunk length spent on numbered documents
const DOCUMENT_SHARE: usize = 60;

/// Newline joining one document's rows to the next inside a batch
const NUMBERED_JOIN_TOKENS: usize = 1;

/// A worked example shown to the model before the real question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerExample {
    pub documents: Vec<String>,
    pub question: String,
    /// The ideal reply, written in the answer protocol
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerOptions {
    pub instructions: Option<String>,
    /// Token budget of one call
    pub chunk_length: usize,
    pub examples: Vec<AnswerExample>,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            instructions: None,
            chunk_length: DEFAULT_CHUNK_LENGTH,
            examples: Vec::new(),
        }
    }
}

impl AnswerOptions {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(250..=100_000).contains(&self.chunk_length) {
            return Err(format!(
                "chunk_length must be between 250 and 100000, got {}",
                self.chunk_length
            ));
        }
        Ok(())
    }
}

struct AnswerTask {
    system: String,
    question: String,
    examples: Vec<Message>,
    max_tokens: usize,
}

impl ChunkTask for AnswerTask {
    type Chunk = NumberedView;
    type Output = AnswerResult;

    fn request(&self, view: &NumberedView) -> GenerateRequest {
        let mut messages = self.examples.clone();
        messages.push(Message::user(prompts::answer_user(&view.formatted, &self.question)));
        GenerateRequest {
            system: self.system.clone(),
            messages,
            stop_sequences: vec![ANSWER_END.to_string()],
            max_tokens: self.max_tokens,
        }
    }

    fn parse(&self, view: &NumberedView, reply: &str) -> std::result::Result<AnswerResult, ProtocolError> {
        parse_answer_response(reply, view)
    }
}

/// Example turns, kept while they fit `budget` tokens
fn example_messages(session: &Session, examples: &[AnswerExample], budget: usize) -> Vec<Message> {
    let mut spent = 0;
    let mut messages = Vec::new();
    for example in examples {
        let documents: Vec<(usize, &str)> = example
            .documents
            .iter()
            .map(String::as_str)
            .enumerate()
            .collect();
        let user = prompts::answer_user(&number_lines(&documents).formatted, &example.question);
        let cost = session.count(&user) + session.count(&example.response);
        if spent + cost > budget {
            log::debug!("Dropping answer examples beyond {budget} tokens");
            break;
        }
        spent += cost;
        messages.push(Message::user(user));
        messages.push(Message::assistant(example.response.clone()));
    }
    messages
}

/// Fold per-chunk results: no answer keeps the first other verdict, one
/// answer wins outright, several answers need consolidation over the
/// documents they cite (in first-cited order).
fn pick_answer(results: Vec<AnswerResult>) -> Merge {
    let (mut answers, others): (Vec<_>, Vec<_>) =
        results.into_iter().partition(AnswerResult::is_answer);

    if answers.len() > 1 {
        let mut seen = HashSet::new();
        let cited: Vec<usize> = answers
            .iter()
            .flat_map(AnswerResult::citations)
            .map(|citation| citation.item)
            .filter(|item| seen.insert(*item))
            .collect();
        return Merge::Consolidate { answers, cited };
    }

    Merge::Final(
        answers
            .pop()
            .or_else(|| others.into_iter().next())
            .unwrap_or_else(|| {
                AnswerResult::missing_knowledge("No relevant information found in documents.")
            }),
    )
}

enum Merge {
    Final(AnswerResult),
    Consolidate {
        answers: Vec<AnswerResult>,
        cited: Vec<usize>,
    },
}

/// The answer with the most citations; the earliest wins ties
fn best_cited(answers: Vec<AnswerResult>) -> AnswerResult {
    let mut best: Option<AnswerResult> = None;
    for answer in answers {
        let better = best
            .as_ref()
            .map_or(true, |current| answer.citations().len() > current.citations().len());
        if better {
            best = Some(answer);
        }
    }
    best.unwrap_or_else(|| AnswerResult::missing_knowledge("No relevant information found in documents."))
}

impl Session {
    /// Answer `question` from `documents`, citing the lines it relies on.
    ///
    /// Citation items index into `documents`.
    pub async fn answer<T: Serialize>(
        &self,
        documents: &[T],
        question: &str,
        options: &AnswerOptions,
    ) -> Result<Outcome<AnswerResult>> {
        options.validate().map_err(OperationError::invalid_input)?;
        self.track("answer", self.answer_inner(documents, question, options))
            .await
    }

    async fn answer_inner<T: Serialize>(
        &self,
        documents: &[T],
        question: &str,
        options: &AnswerOptions,
    ) -> Result<(AnswerResult, Vec<ChunkFailure>)> {
        if documents.is_empty() {
            return Ok((
                AnswerResult::missing_knowledge("No documents provided to answer the question."),
                Vec::new(),
            ));
        }
        if question.trim().is_empty() {
            return Ok((
                AnswerResult::invalid_question("The question is empty or contains no content."),
                Vec::new(),
            ));
        }

        let texts = documents
            .iter()
            .map(stringify)
            .collect::<context_chunker::Result<Vec<String>>>()?;

        let total = options.chunk_length.min(self.input_window());
        let document_budget = percent(total, DOCUMENT_SHARE);
        let task = AnswerTask {
            system: prompts::answer_system(options.instructions.as_deref()),
            question: question.trim().to_string(),
            examples: example_messages(self, &options.examples, total - document_budget),
            max_tokens: self.limits().max_output_tokens,
        };
        let dispatcher = self.dispatcher()?;

        let all: Vec<(usize, &str)> = texts.iter().map(String::as_str).enumerate().collect();
        let view = number_lines(&all);
        if self.count(&view.formatted) <= document_budget {
            log::debug!("All {} document(s) fit one call", documents.len());
            let result = dispatcher.call(&task, &view).await?;
            return Ok((result, Vec::new()));
        }

        // chunks are packed by the size of what is sent: the numbered rows
        let counts: Vec<usize> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| self.count(&number_lines(&[(i, text.as_str())]).formatted))
            .collect();
        let budget = document_budget.max(1);
        let chunks = Chunker::new(ChunkerConfig {
            item_overhead_tokens: NUMBERED_JOIN_TOKENS,
            hard_limit_tokens: Some(self.input_window().max(budget)),
            ..ChunkerConfig::with_budget(budget)
        })?
        .plan(&counts)?;
        log::info!(
            "Answering over {} chunk(s) of {} document(s)",
            chunks.len(),
            documents.len()
        );
        let views: Vec<NumberedView> = chunks
            .iter()
            .map(|chunk| {
                let docs: Vec<(usize, &str)> = chunk.range.clone().map(|i| (i, texts[i].as_str())).collect();
                number_lines(&docs)
            })
            .collect();

        let (outputs, gaps) = dispatcher.run(&task, &views).await?.into_parts();
        if outputs.is_empty() {
            if let Some(first) = gaps.first().cloned() {
                return Err(first.into());
            }
        }
        let results: Vec<AnswerResult> = outputs.into_iter().map(|(_, result)| result).collect();

        let merged = match pick_answer(results) {
            Merge::Final(result) => result,
            Merge::Consolidate { answers, cited } => {
                self.consolidate(&dispatcher, &task, &texts, answers, &cited, document_budget)
                    .await?
            }
        };
        Ok((merged, gaps))
    }

    /// Ask once more over only the cited documents, if they fit
    async fn consolidate(
        &self,
        dispatcher: &Dispatcher,
        task: &AnswerTask,
        texts: &[String],
        answers: Vec<AnswerResult>,
        cited: &[usize],
        budget: usize,
    ) -> Result<AnswerResult> {
        dispatcher.check_cancelled()?;
        let docs: Vec<(usize, &str)> = cited.iter().map(|&i| (i, texts[i].as_str())).collect();
        let view = number_lines(&docs);
        if self.count(&view.formatted) > budget {
            log::info!(
                "Cited documents ({}) exceed the budget, keeping the best-cited answer",
                cited.len()
            );
            return Ok(best_cited(answers));
        }

        log::info!("Consolidating {} answers over {} cited document(s)", answers.len(), cited.len());
        match dispatcher.call(task, &view).await {
            Ok(result) => Ok(result),
            Err(context_dispatch::DispatchError::Chunk(failure)) => {
                log::warn!("Consolidation failed ({failure}), keeping the best-cited answer");
                Ok(best_cited(answers))
            }
            Err(err) => Err(err.into()),
        }
    }
}
