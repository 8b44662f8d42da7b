use crate::{ESCAPED_MARKER, MARKER};
use std::cmp::Ordering;
use std::fmt;

/// A single parsed patch operation.
///
/// Line numbers are ORIGINAL (pre-edit) 1-based addresses. Ranges are
/// inclusive and always satisfy `start <= end` when produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    InsertBefore { line: usize, text: String },
    InsertAfter { line: usize, text: String },
    ReplaceOne { line: usize, lines: Vec<String> },
    ReplaceRange { start: usize, end: usize, lines: Vec<String> },
    DeleteOne { line: usize },
    DeleteRange { start: usize, end: usize },
}

impl PatchOp {
    /// Position of this op's family in the canonical application order
    const fn rank(&self) -> u8 {
        match self {
            Self::DeleteOne { .. } => 0,
            Self::DeleteRange { .. } => 1,
            Self::ReplaceOne { .. } => 2,
            Self::ReplaceRange { .. } => 3,
            Self::InsertBefore { .. } => 4,
            Self::InsertAfter { .. } => 5,
        }
    }

    /// First original line this op touches
    #[must_use]
    pub const fn anchor(&self) -> usize {
        match self {
            Self::InsertBefore { line, .. }
            | Self::InsertAfter { line, .. }
            | Self::ReplaceOne { line, .. }
            | Self::DeleteOne { line } => *line,
            Self::ReplaceRange { start, .. } | Self::DeleteRange { start, .. } => *start,
        }
    }

    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteOne { .. } | Self::DeleteRange { .. })
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank()).then_with(|| {
            if self.is_delete() {
                other.anchor().cmp(&self.anchor())
            } else {
                self.anchor().cmp(&other.anchor())
            }
        })
    }
}

/// Sort ops into the canonical application order.
///
/// The sort is stable: ops with the same family and anchor keep author order.
#[must_use]
pub fn canonicalize(mut ops: Vec<PatchOp>) -> Vec<PatchOp> {
    ops.sort_by(PatchOp::canonical_cmp);
    ops
}

fn escape(payload: &str) -> String {
    payload.replace(MARKER, ESCAPED_MARKER)
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsertBefore { line, text } => write!(f, "{MARKER}<{line}|{}", escape(text)),
            Self::InsertAfter { line, text } => write!(f, "{MARKER}>{line}|{}", escape(text)),
            Self::ReplaceOne { line, lines } => {
                let body: Vec<String> = lines.iter().map(|l| escape(l)).collect();
                write!(f, "{MARKER}={line}|{}", body.join("\n"))
            }
            Self::ReplaceRange { start, end, lines } => {
                let body: Vec<String> = lines.iter().map(|l| escape(l)).collect();
                write!(f, "{MARKER}={start}-{end}|{}", body.join("\n"))
            }
            Self::DeleteOne { line } => write!(f, "{MARKER}-{line}"),
            Self::DeleteRange { start, end } => write!(f, "{MARKER}-{start}-{end}"),
        }
    }
}
