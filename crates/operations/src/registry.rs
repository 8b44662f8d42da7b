//! Group registry for the consensus pass of `group`.
//!
//! Workers never touch the registry: they only propose `(item, label)`
//! pairs. Proposals are committed here in one sequential pass after each
//! parallel phase has fully completed.

use context_chunker::Tokenizer;
use context_protocol::normalize_label;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Flat token cost added to every label when packing group lists
const GROUP_OVERHEAD_TOKENS: usize = 10;

/// Whether an unknown label may open a new group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewGroups {
    Create,
    /// Only for items that have no group yet
    ForUnassigned,
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    label: String,
    /// item -> number of proposals naming this group
    votes: BTreeMap<usize, usize>,
}

#[derive(Debug, Clone)]
pub struct GroupRegistry {
    entries: Vec<Entry>,
    by_label: HashMap<String, usize>,
    ids: HashSet<String>,
    /// Per item, the groups it has been shown or assigned
    seen: Vec<BTreeSet<usize>>,
    next_id: usize,
}

impl GroupRegistry {
    #[must_use]
    pub fn new(item_count: usize) -> Self {
        Self {
            entries: Vec::new(),
            by_label: HashMap::new(),
            ids: HashSet::new(),
            seen: vec![BTreeSet::new(); item_count],
            next_id: 0,
        }
    }

    /// Register a caller-provided group. Returns false for a duplicate id
    /// or a label that normalizes like an existing one.
    pub fn seed(&mut self, id: &str, label: &str) -> bool {
        let normalized = normalize_label(label);
        if self.ids.contains(id) || self.by_label.contains_key(&normalized) {
            log::warn!("Ignoring duplicate initial group {id} ({label})");
            return false;
        }
        self.insert(id.to_string(), label, normalized);
        true
    }

    fn insert(&mut self, id: String, label: &str, normalized: String) -> usize {
        let group = self.entries.len();
        self.ids.insert(id.clone());
        self.by_label.insert(normalized, group);
        self.entries.push(Entry {
            id,
            label: label.to_string(),
            votes: BTreeMap::new(),
        });
        group
    }

    fn create(&mut self, label: &str, normalized: String) -> usize {
        let id = loop {
            let candidate = format!("group_{}", self.next_id);
            self.next_id += 1;
            if !self.ids.contains(&candidate) {
                break candidate;
            }
        };
        log::debug!("New group {id}: {label}");
        self.insert(id, label, normalized)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn label(&self, group: usize) -> &str {
        &self.entries[group].label
    }

    #[must_use]
    pub fn id(&self, group: usize) -> &str {
        &self.entries[group].id
    }

    /// Existing group whose label normalizes like `label`
    #[must_use]
    pub fn resolve(&self, label: &str) -> Option<usize> {
        self.by_label.get(&normalize_label(label)).copied()
    }

    pub fn mark_seen(&mut self, item: usize, groups: &[usize]) {
        if let Some(seen) = self.seen.get_mut(item) {
            seen.extend(groups.iter().copied());
        }
    }

    /// Groups `item` has not been evaluated against yet
    #[must_use]
    pub fn unseen(&self, item: usize) -> Vec<usize> {
        let seen = &self.seen[item];
        (0..self.entries.len())
            .filter(|group| !seen.contains(group))
            .collect()
    }

    #[must_use]
    pub fn has_group(&self, item: usize) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.votes.contains_key(&item))
    }

    /// Commit one proposal. Returns the group it landed in, if any.
    pub fn record(&mut self, item: usize, label: &str, policy: NewGroups) -> Option<usize> {
        if item >= self.seen.len() {
            return None;
        }
        let normalized = normalize_label(label);
        let group = match self.by_label.get(&normalized) {
            Some(&group) => group,
            None if policy == NewGroups::Create || !self.has_group(item) => {
                self.create(label, normalized)
            }
            None => {
                log::debug!("Ignoring new label '{label}' for already grouped item {item}");
                return None;
            }
        };
        *self.entries[group].votes.entry(item).or_insert(0) += 1;
        self.seen[item].insert(group);
        Some(group)
    }

    /// Put every item without a group into the group labelled `label`,
    /// creating it if needed. Returns how many items moved.
    pub fn assign_leftovers(&mut self, label: &str) -> usize {
        let leftovers: Vec<usize> = (0..self.seen.len())
            .filter(|&item| !self.has_group(item))
            .collect();
        for &item in &leftovers {
            self.record(item, label, NewGroups::Create);
        }
        leftovers.len()
    }

    /// Keep each item in exactly one group: the one with the most votes,
    /// ties going to the lexicographically smallest group id. Returns how
    /// many items had to be resolved.
    pub fn resolve_conflicts(&mut self) -> usize {
        let mut candidates: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
        for (group, entry) in self.entries.iter().enumerate() {
            for (&item, &votes) in &entry.votes {
                candidates.entry(item).or_default().push((group, votes));
            }
        }

        let mut resolved = 0;
        for (item, groups) in candidates {
            if groups.len() < 2 {
                continue;
            }
            let Some(&(winner, _)) = groups
                .iter()
                .max_by(|(ga, va), (gb, vb)| {
                    va.cmp(vb)
                        .then_with(|| self.entries[*gb].id.cmp(&self.entries[*ga].id))
                })
            else {
                continue;
            };
            for &(group, _) in &groups {
                if group != winner {
                    self.entries[group].votes.remove(&item);
                }
            }
            resolved += 1;
        }
        resolved
    }

    /// Pack the given groups into lists whose labels fit `budget` tokens.
    ///
    /// Always returns at least one (possibly empty) list.
    #[must_use]
    pub fn chunk_groups(
        &self,
        groups: &[usize],
        tokenizer: &dyn Tokenizer,
        budget: usize,
    ) -> Vec<Vec<usize>> {
        let mut chunks = Vec::new();
        let mut current = Vec::new();
        let mut running = 0;
        for &group in groups {
            let cost = tokenizer.count(self.label(group)) + GROUP_OVERHEAD_TOKENS;
            if !current.is_empty() && running + cost > budget {
                chunks.push(std::mem::take(&mut current));
                running = 0;
            }
            current.push(group);
            running += cost;
        }
        if !current.is_empty() || chunks.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Non-empty groups in creation order: `(id, label, members)`
    #[must_use]
    pub fn groups(&self) -> Vec<(String, String, Vec<usize>)> {
        self.entries
            .iter()
            .filter(|entry| !entry.votes.is_empty())
            .map(|entry| {
                (
                    entry.id.clone(),
                    entry.label.clone(),
                    entry.votes.keys().copied().collect(),
                )
            })
            .collect()
    }
}
