//! Group-assignment protocol: one `■<index>:<label>■` line per element,
//! terminated by `■END■`. Indices are local to the chunk that was sent.

use crate::error::{ProtocolError, Result};
use crate::{truncate_at, GLYPH, LIST_END};

/// Longest label kept from a reply, in characters
pub const MAX_LABEL_CHARS: usize = 250;

/// One proposed element → label pair, with a chunk-local element index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub element: usize,
    pub label: String,
}

/// Render chunk elements as `■0: text■` rows
#[must_use]
pub fn format_group_elements<S: AsRef<str>>(elements: &[S]) -> String {
    elements
        .iter()
        .enumerate()
        .map(|(i, text)| format!("■{i}: {}■", text.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scan one `■<digits>:<label>■` record at the start of `input`.
fn scan_record(input: &str) -> Option<(usize, &str, &str)> {
    let rest = input.strip_prefix(GLYPH)?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let index = rest[..digits].parse().ok()?;
    let rest = rest[digits..].strip_prefix(':')?;
    let close = rest.find(GLYPH)?;
    if close == 0 {
        return None;
    }
    Some((index, &rest[..close], &rest[close + GLYPH.len_utf8()..]))
}

/// Parse assignments for a chunk of `chunk_len` elements.
///
/// Labels are trimmed and capped at [`MAX_LABEL_CHARS`]; records with an
/// out-of-range index or an empty label are ignored. A non-empty chunk
/// with no usable record is a structural error.
pub fn parse_assignments(response: &str, chunk_len: usize) -> Result<Vec<Assignment>> {
    let text = truncate_at(response, LIST_END);
    let mut assignments = Vec::new();

    let mut rest = text;
    while let Some(pos) = rest.find(GLYPH) {
        rest = &rest[pos..];
        let Some((element, label, tail)) = scan_record(rest) else {
            rest = &rest[GLYPH.len_utf8()..];
            continue;
        };
        rest = tail;

        let label = label.trim();
        if label.is_empty() || element >= chunk_len {
            log::debug!("Ignoring group record ■{element}:{label}■");
            continue;
        }
        assignments.push(Assignment {
            element,
            label: label.chars().take(MAX_LABEL_CHARS).collect(),
        });
    }

    if chunk_len > 0 && assignments.is_empty() {
        return Err(ProtocolError::structural(format!(
            "expected one ■<index>:<label>■ line per element (indices 0 to {}), found none",
            chunk_len - 1
        )));
    }
    Ok(assignments)
}

const LABEL_PREFIXES: [&str; 3] = ["group", "new group", "new"];

fn strip_prefix_with_separator(label: &str) -> Option<&str> {
    LABEL_PREFIXES.iter().find_map(|prefix| {
        label
            .strip_prefix(prefix)?
            .trim_start()
            .strip_prefix(['-', ':'])
            .map(str::trim_start)
    })
}

fn strip_prefix_with_space(label: &str) -> Option<&str> {
    LABEL_PREFIXES.iter().find_map(|prefix| {
        let rest = label.strip_prefix(prefix)?;
        rest.starts_with(char::is_whitespace)
            .then(|| rest.trim_start())
    })
}

/// Matching key for a label: case-folded, without "Group:" / "New group -"
/// style boilerplate. Falls back to the folded label when stripping would
/// leave nothing.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    let folded = label.trim().to_lowercase();
    let stripped = strip_prefix_with_separator(&folded).unwrap_or(&folded);
    let stripped = strip_prefix_with_space(stripped).unwrap_or(stripped).trim();
    if stripped.is_empty() {
        folded
    } else {
        stripped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn formats_elements_with_local_indices() {
        assert_eq!(
            format_group_elements(&["apple", "banana"]),
            "■0: apple■\n■1: banana■"
        );
    }

    #[test]
    fn parses_assignment_lines() {
        let reply = "■0:Fruit■\n■1: Fruit ■\nnoise ■x:bad■\n■2:Vegetable■\n■7:Ignored■\n■END■\n■3:After end■";
        let assignments = parse_assignments(reply, 3).unwrap();
        assert_eq!(
            assignments,
            vec![
                Assignment { element: 0, label: "Fruit".into() },
                Assignment { element: 1, label: "Fruit".into() },
                Assignment { element: 2, label: "Vegetable".into() },
            ]
        );
    }

    #[test]
    fn caps_label_length() {
        let reply = format!("■0:{}■", "x".repeat(400));
        let assignments = parse_assignments(&reply, 1).unwrap();
        assert_eq!(assignments[0].label.chars().count(), MAX_LABEL_CHARS);
    }

    #[test]
    fn empty_reply_is_structural() {
        let err = parse_assignments("I would group them by color.", 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuralResponse);
        assert!(parse_assignments("", 0).unwrap().is_empty());
    }

    #[test]
    fn normalizes_boilerplate_prefixes() {
        assert_eq!(normalize_label("  Fruits "), "fruits");
        assert_eq!(normalize_label("New Group - Fruits"), "fruits");
        assert_eq!(normalize_label("group: Fruits"), "fruits");
        assert_eq!(normalize_label("NEW fruits"), "fruits");
        assert_eq!(normalize_label("new: group fruits"), "fruits");
        assert_eq!(normalize_label("Groupies"), "groupies");
        assert_eq!(normalize_label("Group"), "group");
        assert_eq!(normalize_label("new -"), "new -");
    }
}
