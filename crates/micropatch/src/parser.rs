use crate::error::{PatchError, Result};
use crate::op::{canonicalize, PatchOp};
use crate::{ESCAPED_MARKER, MARKER};

/// Header of a marker line: `<kind><start>[-<end>][|<payload>]`
struct Header<'a> {
    kind: u8,
    start: &'a str,
    end: Option<&'a str>,
    payload: Option<&'a str>,
}

impl<'a> Header<'a> {
    fn scan(rest: &'a str) -> Option<Self> {
        let kind = *rest.as_bytes().first()?;
        if !matches!(kind, b'<' | b'>' | b'=' | b'-') {
            return None;
        }
        let rest = &rest[1..];

        let (start, rest) = take_digits(rest)?;
        let (end, rest) = match rest.strip_prefix('-') {
            Some(tail) => {
                let (end, tail) = take_digits(tail)?;
                (Some(end), tail)
            }
            None => (None, rest),
        };

        let payload = if rest.is_empty() {
            None
        } else {
            Some(rest.strip_prefix('|')?)
        };

        Some(Self {
            kind,
            start,
            end,
            payload,
        })
    }
}

fn take_digits(input: &str) -> Option<(&str, &str)> {
    let len = input.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return None;
    }
    Some(input.split_at(len))
}

fn unescape(payload: &str) -> String {
    payload.replace(ESCAPED_MARKER, MARKER)
}

fn parse_address(digits: &str, line: usize, text: &str) -> Result<usize> {
    match digits.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(PatchError::InvalidAddress {
            line,
            text: text.to_string(),
        }),
    }
}

/// Parse ops text into canonically ordered [`PatchOp`]s.
///
/// Blank lines and lines that do not start with the marker are ignored, so
/// commentary around the ops is tolerated.
pub fn parse_ops(text: &str) -> Result<Vec<PatchOp>> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let mut ops = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let raw = lines[i];
        let source_line = i + 1;
        i += 1;

        let Some(rest) = raw.strip_prefix(MARKER) else {
            continue;
        };
        let header = Header::scan(rest).ok_or_else(|| PatchError::InvalidSyntax {
            line: source_line,
            text: raw.to_string(),
        })?;

        let start = parse_address(header.start, source_line, raw)?;
        let end = header
            .end
            .map(|digits| parse_address(digits, source_line, raw))
            .transpose()?;
        if end.is_some_and(|end| end < start) {
            return Err(PatchError::InvalidAddress {
                line: source_line,
                text: raw.to_string(),
            });
        }

        match header.kind {
            b'<' | b'>' => {
                if end.is_some() {
                    return Err(PatchError::InsertWithRange { line: source_line });
                }
                let text = unescape(header.payload.unwrap_or_default());
                ops.push(if header.kind == b'<' {
                    PatchOp::InsertBefore { line: start, text }
                } else {
                    PatchOp::InsertAfter { line: start, text }
                });
            }
            b'-' => {
                if header.payload.is_some_and(|p| !p.is_empty()) {
                    return Err(PatchError::DeleteWithPayload { line: source_line });
                }
                ops.push(match end {
                    Some(end) => PatchOp::DeleteRange { start, end },
                    None => PatchOp::DeleteOne { line: start },
                });
            }
            _ => {
                let mut payload = vec![unescape(header.payload.unwrap_or_default())];
                while i < lines.len() && !lines[i].starts_with(MARKER) {
                    payload.push(unescape(lines[i]));
                    i += 1;
                }
                while payload.len() > 1 && payload.last().is_some_and(String::is_empty) {
                    payload.pop();
                }
                ops.push(match end {
                    Some(end) => PatchOp::ReplaceRange {
                        start,
                        end,
                        lines: payload,
                    },
                    None => PatchOp::ReplaceOne {
                        line: start,
                        lines: payload,
                    },
                });
            }
        }
    }

    Ok(canonicalize(ops))
}

/// Parse without applying; returns the number of ops.
pub fn validate(text: &str) -> Result<usize> {
    parse_ops(text).map(|ops| ops.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn op(text: &str) -> String {
        format!("{MARKER}{text}")
    }

    #[test]
    fn parses_every_op_family() {
        let text = [
            op("<1|before"),
            op(">2|after"),
            op("=3|one"),
            op("=4-5|range"),
            op("-6"),
            op("-7-8"),
        ]
        .join("\n");

        let ops = parse_ops(&text).unwrap();
        assert_eq!(
            ops,
            vec![
                PatchOp::DeleteOne { line: 6 },
                PatchOp::DeleteRange { start: 7, end: 8 },
                PatchOp::ReplaceOne {
                    line: 3,
                    lines: vec!["one".into()]
                },
                PatchOp::ReplaceRange {
                    start: 4,
                    end: 5,
                    lines: vec!["range".into()]
                },
                PatchOp::InsertBefore {
                    line: 1,
                    text: "before".into()
                },
                PatchOp::InsertAfter {
                    line: 2,
                    text: "after".into()
                },
            ]
        );
    }

    #[test]
    fn multiline_payload_stops_at_next_marker() {
        let text = format!("{}\nMULTI2\n\nMULTI3\n\n{}", op("=2|MULTI1"), op("=4|X"));
        let ops = parse_ops(&text).unwrap();
        assert_eq!(
            ops[0],
            PatchOp::ReplaceOne {
                line: 2,
                lines: vec!["MULTI1".into(), "MULTI2".into(), String::new(), "MULTI3".into()]
            }
        );
        assert_eq!(
            ops[1],
            PatchOp::ReplaceOne {
                line: 4,
                lines: vec!["X".into()]
            }
        );
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = format!("# comment\n{}\n\n{}", op("-1"), op("=2|X"));
        assert_eq!(validate(&text).unwrap(), 2);
        assert_eq!(validate("").unwrap(), 0);
    }

    #[test]
    fn rejects_structural_errors() {
        assert!(matches!(
            parse_ops(&op("INVALID")),
            Err(PatchError::InvalidSyntax { line: 1, .. })
        ));
        assert_eq!(
            parse_ops(&op("<1-2|X")),
            Err(PatchError::InsertWithRange { line: 1 })
        );
        assert_eq!(
            parse_ops(&format!("\n{}", op("-1|INVALID"))),
            Err(PatchError::DeleteWithPayload { line: 2 })
        );
        assert!(matches!(
            parse_ops(&op("-0")),
            Err(PatchError::InvalidAddress { .. })
        ));
        assert!(matches!(
            parse_ops(&op("-3-2")),
            Err(PatchError::InvalidAddress { .. })
        ));
        assert!(matches!(
            parse_ops(&op("-99999999999999999999999999")),
            Err(PatchError::InvalidAddress { .. })
        ));
        assert!(matches!(
            parse_ops(&op("=2-|X")),
            Err(PatchError::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn unescapes_only_the_marker() {
        let text = op(&format!("=1|{ESCAPED_MARKER} start \\n stays"));
        let ops = parse_ops(&text).unwrap();
        assert_eq!(
            ops,
            vec![PatchOp::ReplaceOne {
                line: 1,
                lines: vec![format!("{MARKER} start \\n stays")]
            }]
        );
    }

    #[test]
    fn display_output_parses_back() {
        let original = PatchOp::ReplaceRange {
            start: 2,
            end: 9,
            lines: vec![format!("{MARKER}lead"), "tail".into()],
        };
        let reparsed = parse_ops(&original.to_string()).unwrap();
        assert_eq!(reparsed, vec![original]);
    }
}
