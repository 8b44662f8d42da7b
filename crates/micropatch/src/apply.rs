use crate::eol::{join_lines, split_lines, Eol};
use crate::op::{canonicalize, PatchOp};

/// Current location of one original line inside the edited buffer.
///
/// `len` is 1 for untouched lines, `k` after a replace with a k-line payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    #[must_use]
    pub const fn end(self) -> usize {
        self.start + self.len
    }
}

/// Maps original 1-based line numbers to their current buffer span.
///
/// Deleted lines become unmapped; ops that target them are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMap {
    slots: Vec<Option<Span>>,
}

impl AddressMap {
    /// Identity map for a buffer of `line_count` lines
    #[must_use]
    pub fn new(line_count: usize) -> Self {
        Self {
            slots: (0..line_count)
                .map(|start| Some(Span { start, len: 1 }))
                .collect(),
        }
    }

    /// Number of original lines tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current span of original line `line`, if it still exists
    #[must_use]
    pub fn resolve(&self, line: usize) -> Option<Span> {
        line.checked_sub(1)
            .and_then(|idx| self.slots.get(idx))
            .copied()
            .flatten()
    }

    /// First and last surviving lines inside `start..=end`, with the slot
    /// index of the first one.
    fn resolve_range(&self, start: usize, end: usize) -> Option<(usize, Span, Span)> {
        let lo = start.checked_sub(1)?;
        let hi = end.min(self.slots.len());
        if lo >= hi {
            return None;
        }

        let mut first = None;
        let mut last = None;
        for (idx, slot) in self.slots[lo..hi].iter().enumerate() {
            if let Some(span) = slot {
                first.get_or_insert((lo + idx, *span));
                last = Some(*span);
            }
        }
        let (idx, first) = first?;
        Some((idx, first, last?))
    }

    fn unmap(&mut self, start: usize, end: usize) {
        let lo = start.saturating_sub(1).min(self.slots.len());
        let hi = end.min(self.slots.len());
        for slot in &mut self.slots[lo..hi] {
            *slot = None;
        }
    }

    /// Move every span that starts at or after `from` by `delta` lines
    fn shift(&mut self, from: usize, delta: isize) {
        if delta == 0 {
            return;
        }
        for span in self.slots.iter_mut().flatten() {
            if span.start >= from {
                span.start = span.start.saturating_add_signed(delta);
            }
        }
    }
}

/// Line-count delta as a signed shift
fn delta(added: usize, removed: usize) -> isize {
    let added = isize::try_from(added).unwrap_or(isize::MAX);
    let removed = isize::try_from(removed).unwrap_or(isize::MAX);
    added - removed
}

struct Editor {
    lines: Vec<String>,
    map: AddressMap,
    skipped: usize,
}

impl Editor {
    fn new(source: &str) -> Self {
        let lines = split_lines(source);
        let map = AddressMap::new(lines.len());
        Self {
            lines,
            map,
            skipped: 0,
        }
    }

    fn skip(&mut self, op: &PatchOp) {
        log::debug!("micropatch: skipping op with unmapped target: {op}");
        self.skipped += 1;
    }

    fn apply(&mut self, op: &PatchOp) {
        match op {
            PatchOp::DeleteOne { line } => self.delete(*line, *line, op),
            PatchOp::DeleteRange { start, end } => self.delete(*start, *end, op),
            PatchOp::ReplaceOne { line, lines } => self.replace(*line, *line, lines, op),
            PatchOp::ReplaceRange { start, end, lines } => self.replace(*start, *end, lines, op),
            PatchOp::InsertBefore { line, text } => match self.map.resolve(*line) {
                Some(span) => self.insert(span.start, text),
                None => self.skip(op),
            },
            PatchOp::InsertAfter { line, text } => match self.map.resolve(*line) {
                Some(span) => self.insert(span.end(), text),
                None => self.skip(op),
            },
        }
    }

    fn delete(&mut self, start: usize, end: usize, op: &PatchOp) {
        let Some((_, first, last)) = self.map.resolve_range(start, end) else {
            self.skip(op);
            return;
        };
        let removed = last.end() - first.start;
        self.lines.drain(first.start..last.end());
        self.map.unmap(start, end);
        self.map.shift(last.end(), delta(0, removed));
    }

    fn replace(&mut self, start: usize, end: usize, payload: &[String], op: &PatchOp) {
        let Some((slot, first, last)) = self.map.resolve_range(start, end) else {
            self.skip(op);
            return;
        };
        let removed = last.end() - first.start;
        self.lines
            .splice(first.start..last.end(), payload.iter().cloned());
        self.map.unmap(start, end);
        self.map.shift(last.end(), delta(payload.len(), removed));
        self.map.slots[slot] = Some(Span {
            start: first.start,
            len: payload.len(),
        });
    }

    fn insert(&mut self, pos: usize, text: &str) {
        self.lines.insert(pos, text.to_string());
        self.map.shift(pos, 1);
    }
}

/// Apply already-parsed ops to `source`, re-joining lines with `eol`.
///
/// Ops are canonicalized first, so their order in `ops` does not matter.
#[must_use]
pub fn apply_ops(source: &str, ops: &[PatchOp], eol: Eol) -> String {
    let mut editor = Editor::new(source);
    for op in canonicalize(ops.to_vec()) {
        editor.apply(&op);
    }
    if editor.skipped > 0 {
        log::debug!(
            "micropatch: applied {} op(s), skipped {}",
            ops.len() - editor.skipped,
            editor.skipped
        );
    }
    join_lines(&editor.lines, eol)
}
