use context_micropatch::{apply_text, parse_ops, Eol, Micropatch, PatchOp, MARKER};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn deletes_single_line() {
    let result = apply_text("line1\nline2\nline3\n", "◼︎-2", None).unwrap();
    assert_eq!(result, "line1\nline3\n");
}

#[test]
fn replaces_inclusive_range() {
    let result = apply_text("line1\nline2\nline3\nline4\nline5\n", "◼︎=2-4|X", None).unwrap();
    assert_eq!(result, "line1\nX\nline5\n");
}

#[test]
fn combines_delete_replace_and_insert() {
    let ops = "◼︎-3\n◼︎=2|REPLACED\n◼︎>4|INSERTED";
    let result = apply_text("line1\nline2\nline3\nline4\nline5\n", ops, None).unwrap();
    assert_eq!(result, "line1\nREPLACED\nline4\nINSERTED\nline5\n");
}

#[test]
fn keeps_original_references_after_delete() {
    let result = apply_text("A\nB\nC\nD\nE\n", "◼︎-2\n◼︎>3|X", None).unwrap();
    assert_eq!(result, "A\nC\nX\nD\nE\n");
}

#[test]
fn inserts_on_both_sides_of_a_boundary() {
    let result = apply_text("A\nB\n", "◼︎>1|AFTER\n◼︎<2|BEFORE", None).unwrap();
    assert_eq!(result, "A\nAFTER\nBEFORE\nB\n");
}

#[test]
fn repeated_insert_after_stacks_newest_first() {
    let result = apply_text("line1\nline2\n", "◼︎>1|INSERT1\n◼︎>1|INSERT2", None).unwrap();
    assert_eq!(result, "line1\nINSERT2\nINSERT1\nline2\n");
}

#[test]
fn multiline_replace_with_escaped_marker() {
    let ops = "◼︎=2|This has \\◼︎ marker\nSecond line\nThird line";
    let result = apply_text("line1\nline2\nline3\n", ops, None).unwrap();
    assert_eq!(result, "line1\nThis has ◼︎ marker\nSecond line\nThird line\nline3\n");
}

#[test]
fn multiline_payload_ends_at_next_op() {
    let ops = "◼︎=2|MULTI1\nMULTI2\n◼︎=4|REPLACED";
    let result = apply_text("line1\nline2\nline3\nline4\n", ops, None).unwrap();
    assert_eq!(result, "line1\nMULTI1\nMULTI2\nline3\nREPLACED\n");
}

#[test]
fn insert_into_empty_source() {
    assert_eq!(apply_text("", "◼︎<1|NEW", None).unwrap(), "NEW\n");
}

#[test]
fn eol_detection_and_override() {
    let ops = "◼︎=2|REPLACED";
    assert_eq!(
        apply_text("line1\r\nline2\r\nline3\r\n", ops, None).unwrap(),
        "line1\r\nREPLACED\r\nline3\r\n"
    );
    assert_eq!(
        apply_text("line1\nline2\nline3\n", ops, Some(Eol::Crlf)).unwrap(),
        "line1\r\nREPLACED\r\nline3\r\n"
    );
    assert_eq!(
        apply_text("line1\r\nline2\r\nline3\r\n", ops, Some(Eol::Lf)).unwrap(),
        "line1\nREPLACED\nline3\n"
    );
}

#[test]
fn sequential_patches_on_one_buffer() {
    let mut buffer = Micropatch::new("line1\nline2\nline3\n");
    buffer.apply("◼︎=2|REPLACED").unwrap();
    buffer.apply("◼︎-3").unwrap();
    assert_eq!(buffer.text(), "line1\nREPLACED\n");
}

#[test]
fn reapplying_deletes_is_harmless() {
    let once = apply_text("a\nb\nc\nd\n", "◼︎-2-3", None).unwrap();
    assert_eq!(once, "a\nd\n");
    // Lines 2 and 3 of the output are "d" and the trailing empty line
    let twice = apply_text(&once, "◼︎-2-3", None).unwrap();
    assert_eq!(twice, "a");
    let idle = apply_text(&twice, "◼︎-2-3", None).unwrap();
    assert_eq!(idle, "a");
}

fn document() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z ]{0,8}", 2..30)
}

#[derive(Debug, Clone)]
enum Edit {
    Delete,
    Replace(Vec<String>),
    Before(String),
    After(String),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        Just(Edit::Delete),
        prop::collection::vec("[a-z]{1,6}", 1..4).prop_map(Edit::Replace),
        "[a-z]{1,6}".prop_map(Edit::Before),
        "[a-z]{1,6}".prop_map(Edit::After),
    ]
}

fn to_op(line: usize, edit: &Edit) -> PatchOp {
    match edit.clone() {
        Edit::Delete => PatchOp::DeleteOne { line },
        Edit::Replace(lines) => PatchOp::ReplaceOne { line, lines },
        Edit::Before(text) => PatchOp::InsertBefore { line, text },
        Edit::After(text) => PatchOp::InsertAfter { line, text },
    }
}

fn render_ops(ops: &[PatchOp]) -> String {
    ops.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

proptest! {
    #[test]
    fn empty_patch_is_identity(lines in document()) {
        let source = lines.join("\n");
        prop_assert_eq!(apply_text(&source, "", None).unwrap(), source);
    }

    #[test]
    fn delete_removes_exactly_one_line(lines in document(), pick in any::<prop::sample::Index>()) {
        let source = lines.join("\n");
        let target = pick.index(lines.len()) + 1;
        let result = apply_text(&source, &format!("{MARKER}-{target}"), None).unwrap();

        let mut expected = lines.clone();
        expected.remove(target - 1);
        prop_assert_eq!(result.split('\n').count(), lines.len() - 1);
        prop_assert_eq!(result, expected.join("\n"));
    }

    #[test]
    fn replace_changes_line_count_by_payload(
        lines in document(),
        pick in any::<prop::sample::Index>(),
        payload in prop::collection::vec("[a-z]{1,6}", 1..5),
    ) {
        let source = lines.join("\n");
        let line = pick.index(lines.len()) + 1;
        let op = PatchOp::ReplaceOne { line, lines: payload.clone() };
        let result = apply_text(&source, &op.to_string(), None).unwrap();
        prop_assert_eq!(result.split('\n').count(), lines.len() + payload.len() - 1);
    }

    #[test]
    fn author_order_does_not_matter(
        (lines, edits) in document().prop_flat_map(|lines| {
            let n = lines.len();
            (Just(lines), prop::collection::vec(prop::option::of(edit()), n))
        }),
        seed in any::<u64>(),
    ) {
        let source = lines.join("\n");
        let ops: Vec<PatchOp> = edits
            .iter()
            .enumerate()
            .filter_map(|(i, edit)| edit.as_ref().map(|edit| to_op(i + 1, edit)))
            .collect();

        let mut shuffled = ops.clone();
        // Deterministic rotation plus reversal keyed on the seed
        if !shuffled.is_empty() {
            let len = shuffled.len();
            shuffled.rotate_left(usize::try_from(seed % len as u64).unwrap());
            if seed % 2 == 0 {
                shuffled.reverse();
            }
        }

        let forward = apply_text(&source, &render_ops(&ops), None).unwrap();
        let reordered = apply_text(&source, &render_ops(&shuffled), None).unwrap();
        prop_assert_eq!(forward, reordered);
    }

    #[test]
    fn display_parses_back(
        line in 1usize..500,
        payload in prop::collection::vec("[a-z ]{0,4}[a-z]", 1..4),
        leading_marker in any::<bool>(),
    ) {
        let mut lines = payload;
        if leading_marker {
            lines[0] = format!("{MARKER}{}", lines[0]);
        }
        let op = PatchOp::ReplaceOne { line, lines };
        prop_assert_eq!(parse_ops(&op.to_string()).unwrap(), vec![op]);
    }
}
