use serde::{Deserialize, Serialize};

/// One formatted line and where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMapping {
    /// 1-based number across the whole batch
    pub line_number: usize,
    /// Position of the document inside this batch
    pub document: usize,
    /// Index of the document in the caller's original list
    pub item: usize,
    /// 0-based line inside the document
    pub line_in_document: usize,
    pub text: String,
}

/// A batch of documents rendered as `■NNN | line` rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberedView {
    pub formatted: String,
    pub mappings: Vec<LineMapping>,
}

impl NumberedView {
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.mappings.len()
    }

    /// Mappings for `start..=end`, clamped to the lines that exist
    #[must_use]
    pub fn lines(&self, start: usize, end: usize) -> &[LineMapping] {
        let lo = start.saturating_sub(1).min(self.mappings.len());
        let hi = end.min(self.mappings.len()).max(lo);
        &self.mappings[lo..hi]
    }

    /// Distinct caller item indices, in batch order
    #[must_use]
    pub fn items(&self) -> Vec<usize> {
        let mut items: Vec<usize> = Vec::new();
        for mapping in &self.mappings {
            if items.last() != Some(&mapping.item) {
                items.push(mapping.item);
            }
        }
        items
    }
}

/// Number every line of `documents` (pairs of caller item index and text).
///
/// Numbers run across documents and are zero padded to
/// `max(3, digits(total lines))`.
#[must_use]
pub fn number_lines<S: AsRef<str>>(documents: &[(usize, S)]) -> NumberedView {
    let total: usize = documents
        .iter()
        .map(|(_, text)| text.as_ref().split('\n').count())
        .sum();
    let width = total.to_string().len().max(3);

    let mut rows = Vec::with_capacity(total);
    let mut mappings = Vec::with_capacity(total);
    for (document, (item, text)) in documents.iter().enumerate() {
        for (line_in_document, line) in text.as_ref().split('\n').enumerate() {
            let line_number = mappings.len() + 1;
            rows.push(format!("■{line_number:0width$} | {line}"));
            mappings.push(LineMapping {
                line_number,
                document,
                item: *item,
                line_in_document,
                text: line.to_string(),
            });
        }
    }

    NumberedView {
        formatted: rows.join("\n"),
        mappings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn numbers_across_documents() {
        let view = number_lines(&[(4, "Botpress\nfounded 2016"), (9, "HQ Quebec")]);
        assert_eq!(
            view.formatted,
            "■001 | Botpress\n■002 | founded 2016\n■003 | HQ Quebec"
        );
        assert_eq!(view.mappings[1].item, 4);
        assert_eq!(view.mappings[1].line_in_document, 1);
        assert_eq!(view.mappings[2].document, 1);
        assert_eq!(view.items(), vec![4, 9]);
    }

    #[test]
    fn padding_grows_with_line_count() {
        let doc = "x\n".repeat(1200);
        let view = number_lines(&[(0, doc.as_str())]);
        assert!(view.formatted.starts_with("■0001 | x"));
        assert_eq!(view.line_count(), 1201);
    }

    #[test]
    fn line_ranges_are_clamped() {
        let view = number_lines(&[(0, "a\nb\nc")]);
        assert_eq!(view.lines(2, 3).len(), 2);
        assert_eq!(view.lines(3, 99).len(), 1);
        assert!(view.lines(7, 9).is_empty());
        assert!(view.lines(0, 0).is_empty());
    }
}
