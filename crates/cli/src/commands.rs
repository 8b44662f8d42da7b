use crate::{
    print_json, print_stdout, AnswerArgs, ChunkArgs, EditArgs, GroupArgs, LabelArgs, PatchArgs,
    RenderArgs,
};
use anyhow::{Context as AnyhowContext, Result};
use context_chunker::{prepare_items, Chunker, ChunkerConfig, Tokenizer};
use context_dispatch::{ChunkFailure, Usage};
use context_micropatch::{apply_text, render_numbered};
use context_operations::{
    AnswerOptions, AnswerResult, Citation, FileInput, GroupOptions, LabelOptions, Session,
};
use serde_json::{json, Value};
use std::io::{self, Read, Write};
use std::path::Path;

/// Read a file, or stdin for `-`
fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// One JSON value per non-blank line
fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    read_input(path)?
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).with_context(|| {
                format!("{}:{}: invalid JSON", path.display(), number + 1)
            })
        })
        .collect()
}

/// Exact bytes to stdout, no trailing newline added
fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
        Err(err) if err.kind() != io::ErrorKind::BrokenPipe => Err(err.into()),
        _ => Ok(()),
    }
}

fn summary(usage: &Usage, gaps: &[ChunkFailure]) {
    log::info!(
        "{} call(s), {} input / {} output tokens, ${:.4}",
        usage.requests.completed,
        usage.tokens.input,
        usage.tokens.output,
        usage.cost_usd()
    );
    for gap in gaps {
        log::warn!("Chunk {} left out ({}): {}", gap.chunk, gap.kind, gap.message);
    }
}

pub(crate) fn patch(args: &PatchArgs, json: bool) -> Result<()> {
    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let ops = read_input(&args.ops)?;
    let patched = apply_text(&source, &ops, args.eol.map(Into::into))?;

    if args.in_place {
        std::fs::write(&args.file, &patched)
            .with_context(|| format!("Failed to write {}", args.file.display()))?;
        log::info!("Patched {}", args.file.display());
        if json {
            print_json(&json!({ "path": args.file, "changed": patched != source }))?;
        }
        return Ok(());
    }
    if json {
        return print_json(&json!({ "path": args.file, "content": patched }));
    }
    write_stdout(&patched)
}

pub(crate) fn render(args: &RenderArgs, json: bool) -> Result<()> {
    let numbered = render_numbered(&read_input(&args.file)?);
    if json {
        return print_json(&json!({ "numbered": numbered }));
    }
    print_stdout(&numbered)
}

pub(crate) fn chunk(args: &ChunkArgs, tokenizer: &dyn Tokenizer, json: bool) -> Result<()> {
    let chunker = Chunker::new(ChunkerConfig {
        max_items_per_chunk: args.max_items,
        max_tokens_per_item: args.per_item,
        ..ChunkerConfig::with_budget(args.budget)
    })?;
    let items = prepare_items(read_jsonl(&args.items)?, tokenizer, args.per_item)?;
    let chunks = chunker.chunk_items(&items)?;
    log::debug!("{} item(s) packed into {} chunk(s)", items.len(), chunks.len());

    if json {
        let plan: Vec<Value> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "index": chunk.index,
                    "start": chunk.range.start,
                    "end": chunk.range.end,
                    "count": chunk.len(),
                    "tokens": chunk.tokens,
                })
            })
            .collect();
        return print_json(&plan);
    }
    for chunk in &chunks {
        print_stdout(&format!(
            "chunk {}: items {}..{} ({} items, {} tokens)",
            chunk.index,
            chunk.range.start,
            chunk.range.end,
            chunk.len(),
            chunk.tokens
        ))?;
    }
    Ok(())
}

fn citation_lines(citations: &[Citation]) -> Vec<String> {
    citations
        .iter()
        .map(|citation| {
            format!(
                "  [{}] document {}: {}",
                citation.offset,
                citation.item,
                citation.snippet.replace('\n', " / ")
            )
        })
        .collect()
}

fn render_answer(result: &AnswerResult) -> String {
    match result {
        AnswerResult::Answer { answer, citations } => {
            let mut lines = vec![answer.clone()];
            if !citations.is_empty() {
                lines.push(String::new());
                lines.push("Citations:".to_string());
                lines.extend(citation_lines(citations));
            }
            lines.join("\n")
        }
        AnswerResult::Ambiguous {
            ambiguity,
            follow_up,
            answers,
        } => {
            let mut lines = vec![format!("Ambiguous: {ambiguity}"), format!("Follow-up: {follow_up}")];
            for (n, candidate) in answers.iter().enumerate() {
                lines.push(format!("{}. {}", n + 1, candidate.answer));
                lines.extend(citation_lines(&candidate.citations));
            }
            lines.join("\n")
        }
        AnswerResult::OutOfTopic { reason } => format!("Out of topic: {reason}"),
        AnswerResult::InvalidQuestion { reason } => format!("Invalid question: {reason}"),
        AnswerResult::MissingKnowledge { reason } => format!("Missing knowledge: {reason}"),
    }
}

pub(crate) async fn answer(session: &Session, args: &AnswerArgs, json: bool) -> Result<()> {
    let documents = read_jsonl(&args.docs)?;
    let options = AnswerOptions {
        instructions: args.instructions.clone(),
        chunk_length: args.chunk_length,
        ..AnswerOptions::default()
    };
    let outcome = session.answer(&documents, &args.question, &options).await?;
    summary(&outcome.usage, &outcome.gaps);
    if json {
        return print_json(&outcome);
    }
    print_stdout(&render_answer(&outcome.output))
}

pub(crate) async fn group(session: &Session, args: &GroupArgs, json: bool) -> Result<()> {
    let items = read_jsonl(&args.items)?;
    let options = GroupOptions {
        instructions: args.instructions.clone(),
        tokens_per_element: args.tokens_per_element,
        chunk_length: args.chunk_length,
        ..GroupOptions::default()
    };
    let outcome = session.group(items, &options).await?;
    summary(&outcome.usage, &outcome.gaps);
    if json {
        return print_json(&outcome);
    }
    for group in &outcome.output {
        print_stdout(&format!("{} ({})", group.label, group.len()))?;
        for element in &group.elements {
            let text = match element {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            print_stdout(&format!("  - {text}"))?;
        }
    }
    Ok(())
}

pub(crate) async fn label(session: &Session, args: &LabelArgs, json: bool) -> Result<()> {
    let input = read_input(&args.input)?;
    let options = LabelOptions {
        instructions: args.instructions.clone(),
        chunk_length: args.chunk_length,
        ..LabelOptions::default()
    };
    let outcome = session.label(input.as_str(), &args.labels, &options).await?;
    summary(&outcome.usage, &outcome.gaps);
    if json {
        return print_json(&outcome);
    }
    for (key, result) in &outcome.output {
        print_stdout(&format!(
            "{key}: {} ({}, confidence {:.2})",
            result.value, result.label, result.confidence
        ))?;
        if !result.explanation.is_empty() {
            print_stdout(&format!("  {}", result.explanation))?;
        }
    }
    Ok(())
}

pub(crate) async fn edit(session: &Session, args: &EditArgs, json: bool) -> Result<()> {
    let files = args
        .files
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(FileInput::new(path.display().to_string(), content))
        })
        .collect::<Result<Vec<_>>>()?;

    let outcome = session.patch(&files, &args.instructions).await?;
    summary(&outcome.usage, &outcome.gaps);

    for file in outcome.output.iter().filter(|file| file.failed()) {
        log::warn!("{}: {}", file.path, file.patch);
    }
    if args.write {
        for file in outcome.output.iter().filter(|file| file.is_changed()) {
            std::fs::write(&file.path, &file.content)
                .with_context(|| format!("Failed to write {}", file.path))?;
            log::info!("Wrote {}", file.path);
        }
    }

    if json {
        return print_json(&outcome);
    }
    for file in &outcome.output {
        let state = if file.failed() {
            "failed"
        } else if file.is_changed() {
            "changed"
        } else {
            "unchanged"
        };
        print_stdout(&format!("{} ({state})", file.path))?;
        if file.is_changed() {
            print_stdout(&file.patch)?;
        }
    }
    Ok(())
}
