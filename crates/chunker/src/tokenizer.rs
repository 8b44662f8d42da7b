/// Token-level view of text used for budgeting.
///
/// `split` must return pieces whose concatenation is exactly the input, so
/// that slicing at token boundaries never loses characters.
pub trait Tokenizer: Send + Sync {
    /// Split text into token-sized pieces
    fn split(&self, text: &str) -> Vec<String>;

    /// Number of tokens in `text`
    fn count(&self, text: &str) -> usize {
        self.split(text).len()
    }

    /// Keep at most `max_tokens` leading tokens of `text`
    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        self.split(text).into_iter().take(max_tokens).collect()
    }
}

/// Character-count estimate: roughly four characters per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeuristicTokenizer {
    chars_per_token: usize,
}

impl HeuristicTokenizer {
    #[must_use]
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for HeuristicTokenizer {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chars_per_token)
            .map(|piece| piece.iter().collect())
            .collect()
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        text.chars()
            .take(max_tokens.saturating_mul(self.chars_per_token))
            .collect()
    }
}

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use super::{HeuristicTokenizer, Tokenizer};
    use crate::error::{ChunkerError, Result};
    use std::path::Path;

    /// Tokenizer backed by a HuggingFace `tokenizer.json`
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenizer {
        pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
                ChunkerError::Tokenizer(format!("failed to load {}: {e}", path.display()))
            })?;
            Ok(Self { inner })
        }
    }

    fn snap_to_boundary(text: &str, mut offset: usize) -> usize {
        offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }

    impl Tokenizer for HfTokenizer {
        fn split(&self, text: &str) -> Vec<String> {
            if text.is_empty() {
                return Vec::new();
            }
            let encoding = match self.inner.encode(text, false) {
                Ok(encoding) => encoding,
                Err(e) => {
                    log::warn!("Tokenizer failed, falling back to heuristic split: {e}");
                    return HeuristicTokenizer::default().split(text);
                }
            };

            let mut bounds: Vec<usize> = encoding
                .get_offsets()
                .iter()
                .map(|(start, _)| snap_to_boundary(text, *start))
                .collect();
            bounds.sort_unstable();
            bounds.dedup();
            if bounds.first() != Some(&0) {
                bounds.insert(0, 0);
            }
            bounds.push(text.len());
            bounds.dedup();

            bounds
                .windows(2)
                .map(|pair| text[pair[0]..pair[1]].to_string())
                .collect()
        }
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizer;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn heuristic_counts_four_chars_per_token() {
        let tokenizer = HeuristicTokenizer::default();
        assert_eq!(tokenizer.count(""), 0);
        assert_eq!(tokenizer.count("abcd"), 1);
        assert_eq!(tokenizer.count("abcde"), 2);
        assert_eq!(tokenizer.count(&"x".repeat(200)), 50);
    }

    #[test]
    fn heuristic_split_is_lossless_on_multibyte_text() {
        let tokenizer = HeuristicTokenizer::default();
        let text = "héllo wörld ◼︎ ünïcode";
        let pieces = tokenizer.split(text);
        assert_eq!(pieces.concat(), text);
        assert_eq!(pieces.len(), tokenizer.count(text));
    }

    #[test]
    fn truncate_keeps_leading_tokens() {
        let tokenizer = HeuristicTokenizer::default();
        assert_eq!(tokenizer.truncate("abcdefghij", 2), "abcdefgh");
        assert_eq!(tokenizer.truncate("abc", 10), "abc");
    }

    #[test]
    fn default_methods_follow_split() {
        struct Words;
        impl Tokenizer for Words {
            fn split(&self, text: &str) -> Vec<String> {
                text.split_inclusive(' ').map(str::to_string).collect()
            }
        }

        assert_eq!(Words.count("one two three"), 3);
        assert_eq!(Words.truncate("one two three", 2), "one two ");
    }
}
