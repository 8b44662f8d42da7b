//! Grouping by consensus across element chunks.
//!
//! ```text
//! gather   (element chunk x group chunk) pairs, in parallel
//! apply    commit proposals to the registry, sequentially
//! coverage re-send items against groups they have not seen yet
//! resolve  one group per item, leftovers into a fallback group
//! ```

use crate::error::{OperationError, Result};
use crate::prompts;
use crate::registry::{GroupRegistry, NewGroups};
use crate::session::{clamp, percent, Outcome, Session, PROMPT_INPUT_BUFFER, PROMPT_OUTPUT_BUFFER};
use context_chunker::{prepare_items, Chunker, ChunkerConfig};
use context_dispatch::{ChunkFailure, ChunkTask, Dispatcher, GenerateRequest};
use context_protocol::group::MAX_LABEL_CHARS;
use context_protocol::{format_group_elements, parse_assignments, ProtocolError, LIST_END};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Label of the group that collects items no reply placed anywhere
pub const FALLBACK_GROUP: &str = "Other";

const MAX_ELEMENTS_PER_CHUNK: usize = 50;

/// Formatting cost of one `■i: …■` row
const ELEMENT_OVERHEAD_TOKENS: usize = 4;

/// A group known before the run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialGroup {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOptions {
    pub instructions: Option<String>,
    /// Elements longer than this are truncated before chunking
    pub tokens_per_element: usize,
    /// Token ceiling for the elements of one call
    pub chunk_length: usize,
    pub initial_groups: Vec<InitialGroup>,
    /// Rounds that re-check items against groups created after they were sent
    pub max_coverage_passes: usize,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            instructions: None,
            tokens_per_element: 250,
            chunk_length: 16_000,
            initial_groups: Vec::new(),
            max_coverage_passes: 2,
        }
    }
}

impl GroupOptions {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.tokens_per_element == 0 {
            return Err("tokens_per_element must be > 0".to_string());
        }
        if !(100..=100_000).contains(&self.chunk_length) {
            return Err(format!(
                "chunk_length must be between 100 and 100000, got {}",
                self.chunk_length
            ));
        }
        if self.max_coverage_passes > 10 {
            return Err("max_coverage_passes must be <= 10".to_string());
        }
        for group in &self.initial_groups {
            if group.id.is_empty() || group.id.chars().count() > 100 {
                return Err(format!("initial group id '{}' must be 1-100 characters", group.id));
            }
            let label = group.label.trim();
            if label.is_empty() || label.chars().count() > MAX_LABEL_CHARS {
                return Err(format!(
                    "initial group label '{}' must be 1-{MAX_LABEL_CHARS} characters",
                    group.label
                ));
            }
        }
        Ok(())
    }
}

/// One output group. `members` are indices into the input list and line
/// up with `elements`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group<T> {
    pub id: String,
    pub label: String,
    pub members: Vec<usize>,
    pub elements: Vec<T>,
}

impl<T> Group<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Label -> elements view of a grouping
#[must_use]
pub fn into_label_map<T>(groups: Vec<Group<T>>) -> BTreeMap<String, Vec<T>> {
    groups
        .into_iter()
        .map(|group| (group.label, group.elements))
        .collect()
}

/// One call: some elements against some known groups
struct GroupChunk {
    items: Vec<usize>,
    texts: Vec<String>,
    groups: Vec<usize>,
    labels: Vec<String>,
}

struct GroupTask {
    system: String,
    max_tokens: usize,
}

impl ChunkTask for GroupTask {
    type Chunk = GroupChunk;
    type Output = Vec<(usize, String)>;

    fn request(&self, chunk: &GroupChunk) -> GenerateRequest {
        let elements = format_group_elements(&chunk.texts);
        GenerateRequest::new(
            self.system.clone(),
            prompts::group_user(&chunk.labels, &elements, chunk.texts.len()),
        )
        .with_stop(LIST_END)
        .with_max_tokens(self.max_tokens)
    }

    fn parse(&self, chunk: &GroupChunk, reply: &str) -> std::result::Result<Self::Output, ProtocolError> {
        Ok(parse_assignments(reply, chunk.items.len())?
            .into_iter()
            .map(|assignment| (chunk.items[assignment.element], assignment.label))
            .collect())
    }
}

/// Token budgets of one grouping run
struct Budgets {
    elements: usize,
    groups: usize,
}

/// Per-run state shared by every phase
struct Run<'a> {
    session: &'a Session,
    dispatcher: Dispatcher,
    task: GroupTask,
    chunker: Chunker,
    budgets: Budgets,
    texts: Vec<String>,
    tokens: Vec<usize>,
    gaps: Vec<ChunkFailure>,
}

impl Run<'_> {
    /// Pair every element chunk of `pending` with group lists from `groups_for`
    fn build_chunks(
        &self,
        registry: &GroupRegistry,
        pending: &[usize],
        groups_for: impl Fn(&[usize]) -> Vec<usize>,
    ) -> Result<Vec<GroupChunk>> {
        let counts: Vec<usize> = pending.iter().map(|&item| self.tokens[item]).collect();
        let mut chunks = Vec::new();
        for planned in self.chunker.plan(&counts)? {
            let items = planned.slice(pending).to_vec();
            let groups = groups_for(&items);
            for groups in
                registry.chunk_groups(&groups, self.session.tokenizer(), self.budgets.groups)
            {
                chunks.push(GroupChunk {
                    texts: items.iter().map(|&item| self.texts[item].clone()).collect(),
                    items: items.clone(),
                    labels: groups
                        .iter()
                        .map(|&group| registry.label(group).to_string())
                        .collect(),
                    groups,
                });
            }
        }
        Ok(chunks)
    }

    /// Gather proposals in parallel, then commit them in chunk order
    async fn round(
        &mut self,
        registry: &mut GroupRegistry,
        chunks: Vec<GroupChunk>,
        policy: NewGroups,
    ) -> Result<()> {
        let report = self.dispatcher.run(&self.task, &chunks).await?;
        for (chunk, result) in chunks.iter().zip(report.results) {
            match result {
                Ok(assignments) => {
                    for &item in &chunk.items {
                        registry.mark_seen(item, &chunk.groups);
                    }
                    for (item, label) in assignments {
                        registry.record(item, &label, policy);
                    }
                }
                Err(failure) => {
                    log::warn!("Leaving out grouping chunk: {failure}");
                    self.gaps.push(failure);
                }
            }
        }
        Ok(())
    }
}

impl Session {
    /// Sort `items` into labelled groups.
    ///
    /// Every item ends up in exactly one group and every group has at least
    /// one member.
    pub async fn group<T: Serialize>(
        &self,
        items: Vec<T>,
        options: &GroupOptions,
    ) -> Result<Outcome<Vec<Group<T>>>> {
        options.validate().map_err(OperationError::invalid_input)?;
        self.track("group", self.group_inner(items, options)).await
    }

    async fn group_inner<T: Serialize>(
        &self,
        items: Vec<T>,
        options: &GroupOptions,
    ) -> Result<(Vec<Group<T>>, Vec<ChunkFailure>)> {
        if items.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let total = self
            .limits()
            .max_input_tokens
            .saturating_sub(PROMPT_INPUT_BUFFER + PROMPT_OUTPUT_BUFFER);
        let instructions = options.instructions.as_deref().map(|text| {
            let limit = clamp(self.count(text), 100, percent(total, 20));
            self.tokenizer().truncate(text, limit)
        });
        let available = total - instructions.as_deref().map_or(0, |text| self.count(text));
        let budgets = Budgets {
            elements: percent(available, 60).min(options.chunk_length).max(1),
            groups: percent(available, 40).max(1),
        };

        let prepared = prepare_items(items, self.tokenizer(), Some(options.tokens_per_element))?;
        let count = prepared.len();
        let mut texts = Vec::with_capacity(count);
        let mut tokens = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);
        for item in prepared {
            texts.push(item.text);
            tokens.push(item.tokens);
            values.push(Some(item.value));
        }

        let mut registry = GroupRegistry::new(count);
        for group in &options.initial_groups {
            registry.seed(&group.id, group.label.trim());
        }

        let mut run = Run {
            session: self,
            dispatcher: self.dispatcher()?,
            task: GroupTask {
                system: prompts::group_system(instructions.as_deref()),
                max_tokens: self.limits().max_output_tokens,
            },
            chunker: Chunker::new(ChunkerConfig {
                max_items_per_chunk: Some(MAX_ELEMENTS_PER_CHUNK),
                item_overhead_tokens: ELEMENT_OVERHEAD_TOKENS,
                ..ChunkerConfig::with_budget(budgets.elements)
            })?,
            budgets,
            texts,
            tokens,
            gaps: Vec::new(),
        };

        let everything: Vec<usize> = (0..count).collect();
        let known: Vec<usize> = (0..registry.len()).collect();
        let chunks = run.build_chunks(&registry, &everything, |_| known.clone())?;
        log::info!("Grouping {count} item(s) in {} call(s)", chunks.len());
        run.round(&mut registry, chunks, NewGroups::Create).await?;

        for pass in 1..=options.max_coverage_passes {
            self.check_cancelled()?;
            let pending: Vec<usize> = (0..count)
                .filter(|&item| !registry.unseen(item).is_empty())
                .collect();
            if pending.is_empty() {
                break;
            }
            let chunks = run.build_chunks(&registry, &pending, |items| {
                let unseen: BTreeSet<usize> =
                    items.iter().flat_map(|&item| registry.unseen(item)).collect();
                unseen.into_iter().collect()
            })?;
            log::info!(
                "Coverage pass {pass}: {} item(s) in {} call(s)",
                pending.len(),
                chunks.len()
            );
            run.round(&mut registry, chunks, NewGroups::ForUnassigned).await?;
        }

        let uncovered = (0..count)
            .filter(|&item| !registry.unseen(item).is_empty())
            .count();
        if uncovered > 0 {
            log::warn!("{uncovered} item(s) were not checked against every group");
        }
        let moved = registry.assign_leftovers(FALLBACK_GROUP);
        if moved > 0 {
            log::warn!("{moved} item(s) got no group and went to '{FALLBACK_GROUP}'");
        }
        let resolved = registry.resolve_conflicts();
        if resolved > 0 {
            log::debug!("Resolved {resolved} item(s) proposed for several groups");
        }

        let groups = registry
            .groups()
            .into_iter()
            .map(|(id, label, members)| Group {
                elements: members
                    .iter()
                    .filter_map(|&item| values[item].take())
                    .collect(),
                id,
                label,
                members,
            })
            .collect();
        Ok((groups, run.gaps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_options_valid() {
        assert!(GroupOptions::default().validate().is_ok());
    }

    #[test]
    fn test_blank_initial_label_invalid() {
        let options = GroupOptions {
            initial_groups: vec![InitialGroup {
                id: "g".into(),
                label: "  ".into(),
            }],
            ..GroupOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn parse_maps_local_indices_to_items() {
        let task = GroupTask {
            system: String::new(),
            max_tokens: 100,
        };
        let chunk = GroupChunk {
            items: vec![7, 9],
            texts: vec!["a".into(), "b".into()],
            groups: Vec::new(),
            labels: Vec::new(),
        };
        let parsed = task.parse(&chunk, "■1:Fruit■\n■0:Veg■\n■END■").unwrap();
        assert_eq!(parsed, vec![(9, "Fruit".to_string()), (7, "Veg".to_string())]);
    }

    #[test]
    fn request_lists_known_labels() {
        let task = GroupTask {
            system: "sys".into(),
            max_tokens: 100,
        };
        let chunk = GroupChunk {
            items: vec![0],
            texts: vec!["apple".into()],
            groups: vec![0],
            labels: vec!["Fruit".into()],
        };
        let request = task.request(&chunk);
        let user = request.last_user().unwrap_or_default();
        assert!(user.contains("- Fruit"));
        assert!(user.contains("■0: apple■"));
        assert_eq!(request.stop_sequences, vec![LIST_END.to_string()]);
    }

    #[test]
    fn label_map_uses_labels() {
        let map = into_label_map(vec![Group {
            id: "group_0".into(),
            label: "Fruit".into(),
            members: vec![0, 1],
            elements: vec!["apple", "banana"],
        }]);
        assert_eq!(map["Fruit"], vec!["apple", "banana"]);
    }
}
