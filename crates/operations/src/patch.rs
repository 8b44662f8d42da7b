//! Model-driven file editing through micropatch ops.
//!
//! All files go out in one call as numbered `<FILE>` blocks; the reply
//! carries one block of ops per file that needs a change. Op syntax is
//! checked while parsing, so a malformed body earns a corrective turn
//! instead of a broken file.

use crate::error::{OperationError, Result};
use crate::prompts;
use crate::session::{clamp, percent, Outcome, Session, PROMPT_INPUT_BUFFER, PROMPT_OUTPUT_BUFFER};
use context_dispatch::{ChunkFailure, ChunkTask, GenerateRequest};
use context_micropatch::{apply_text, render_numbered, validate};
use context_protocol::{format_file_block, parse_file_blocks, ProtocolError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    pub path: String,
    pub name: String,
    pub content: String,
}

impl FileInput {
    /// Input named after the last path segment
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit(['/', '\\']).next().unwrap_or_default().to_string();
        Self {
            path,
            name,
            content: content.into(),
        }
    }
}

/// A file after patching. `patch` holds the ops that were applied, empty
/// when the file was left alone, or `ERROR: …` when they could not be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchedFile {
    pub path: String,
    pub name: String,
    pub content: String,
    pub patch: String,
}

impl PatchedFile {
    #[must_use]
    pub fn is_changed(&self) -> bool {
        !self.patch.is_empty() && !self.failed()
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.patch.starts_with("ERROR:")
    }
}

struct PatchRequest {
    user: String,
    paths: HashSet<String>,
}

struct PatchTask {
    system: String,
    max_tokens: usize,
}

impl ChunkTask for PatchTask {
    type Chunk = PatchRequest;
    /// path -> op text
    type Output = HashMap<String, String>;

    fn request(&self, chunk: &PatchRequest) -> GenerateRequest {
        GenerateRequest::new(self.system.clone(), chunk.user.clone()).with_max_tokens(self.max_tokens)
    }

    fn parse(&self, chunk: &PatchRequest, reply: &str) -> std::result::Result<Self::Output, ProtocolError> {
        let blocks = parse_file_blocks(reply);
        if blocks.is_empty() && reply.contains("<FILE") {
            return Err(ProtocolError::structural(
                "found <FILE but no complete <FILE path=\"...\">…</FILE> block",
            ));
        }

        let mut ops = HashMap::new();
        for block in blocks {
            if !chunk.paths.contains(&block.path) {
                log::debug!("Ignoring ops for unknown path {}", block.path);
                continue;
            }
            if let Err(err) = validate(&block.body) {
                return Err(ProtocolError::structural(format!(
                    "invalid ops for {}: {err}",
                    block.path
                )));
            }
            // a later block for the same path replaces an earlier one
            ops.insert(block.path, block.body);
        }
        Ok(ops)
    }
}

impl Session {
    /// Edit `files` as `instructions` say and return every file, patched or not.
    pub async fn patch(&self, files: &[FileInput], instructions: &str) -> Result<Outcome<Vec<PatchedFile>>> {
        self.track("patch", self.patch_inner(files, instructions)).await
    }

    async fn patch_inner(
        &self,
        files: &[FileInput],
        instructions: &str,
    ) -> Result<(Vec<PatchedFile>, Vec<ChunkFailure>)> {
        if files.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        if instructions.trim().is_empty() {
            return Err(OperationError::invalid_input("instructions must not be empty"));
        }
        let mut paths = HashSet::new();
        for file in files {
            if file.path.is_empty() || !paths.insert(file.path.clone()) {
                return Err(OperationError::invalid_input(format!(
                    "file paths must be non-empty and unique, got '{}'",
                    file.path
                )));
            }
        }

        let total = self
            .limits()
            .max_input_tokens
            .saturating_sub(PROMPT_INPUT_BUFFER + PROMPT_OUTPUT_BUFFER);
        let limit = clamp(self.count(instructions), 1, percent(total, 20));
        let instructions = self.tokenizer().truncate(instructions.trim(), limit);

        let blocks: Vec<String> = files
            .iter()
            .map(|file| format_file_block(&file.path, &file.name, &render_numbered(&file.content)))
            .collect();
        let file_tokens: usize = blocks.iter().map(|block| self.count(block)).sum();
        let budget = total.saturating_sub(self.count(&instructions));
        if file_tokens > budget {
            return Err(OperationError::budget_exceeded(format!(
                "{} file(s) need {file_tokens} tokens but only {budget} are available",
                files.len()
            )));
        }

        let task = PatchTask {
            system: prompts::patch_system(),
            max_tokens: self.limits().max_output_tokens,
        };
        let request = PatchRequest {
            user: prompts::patch_user(&instructions, &blocks.join("\n\n")),
            paths,
        };
        log::info!("Patching {} file(s) ({file_tokens} tokens)", files.len());
        let mut ops = self.dispatcher()?.call(&task, &request).await?;

        let patched = files
            .iter()
            .map(|file| {
                let Some(body) = ops.remove(&file.path) else {
                    return unchanged(file, String::new());
                };
                match apply_text(&file.content, &body, None) {
                    Ok(content) => PatchedFile {
                        path: file.path.clone(),
                        name: file.name.clone(),
                        content,
                        patch: body,
                    },
                    Err(err) => {
                        log::warn!("Could not apply ops to {}: {err}", file.path);
                        unchanged(file, format!("ERROR: {err}"))
                    }
                }
            })
            .collect();
        Ok((patched, Vec::new()))
    }
}

fn unchanged(file: &FileInput, patch: String) -> PatchedFile {
    PatchedFile {
        path: file.path.clone(),
        name: file.name.clone(),
        content: file.content.clone(),
        patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_protocol::ErrorKind;
    use pretty_assertions::assert_eq;

    fn request(paths: &[&str]) -> PatchRequest {
        PatchRequest {
            user: String::new(),
            paths: paths.iter().map(|path| (*path).to_string()).collect(),
        }
    }

    fn task() -> PatchTask {
        PatchTask {
            system: String::new(),
            max_tokens: 100,
        }
    }

    #[test]
    fn file_name_defaults_to_last_segment() {
        assert_eq!(FileInput::new("src/app.rs", "").name, "app.rs");
        assert_eq!(FileInput::new("app.rs", "").name, "app.rs");
    }

    #[test]
    fn parse_keeps_known_paths_only() {
        let reply = "<FILE path=\"a.txt\">\n◼︎-1\n</FILE>\n<FILE path=\"zzz\">\n◼︎-1\n</FILE>";
        let ops = task().parse(&request(&["a.txt"]), reply).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops["a.txt"], "◼︎-1");
    }

    #[test]
    fn invalid_ops_are_structural() {
        let reply = "<FILE path=\"a.txt\">\n◼︎<1-2|x\n</FILE>";
        let err = task().parse(&request(&["a.txt"]), reply).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuralResponse);
    }

    #[test]
    fn no_blocks_means_no_changes() {
        let ops = task().parse(&request(&["a.txt"]), "Nothing to change.").unwrap();
        assert!(ops.is_empty());
        assert!(task().parse(&request(&["a.txt"]), "<FILE path=\"a.txt\">◼︎-1").is_err());
    }

    #[test]
    fn patched_file_flags() {
        let file = FileInput::new("a", "x");
        assert!(!unchanged(&file, String::new()).is_changed());
        assert!(unchanged(&file, "ERROR: bad".into()).failed());
    }
}
