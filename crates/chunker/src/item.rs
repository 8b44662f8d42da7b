use crate::error::Result;
use crate::tokenizer::Tokenizer;
use serde::Serialize;
use serde_json::Value;

/// An input value together with its formatted text and token count
#[derive(Debug, Clone, PartialEq)]
pub struct Item<T> {
    /// Position in the caller's original list
    pub index: usize,
    pub value: T,
    pub text: String,
    pub tokens: usize,
}

/// Text form of an item: strings verbatim, anything else as pretty JSON.
pub fn stringify<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(match serde_json::to_value(value)? {
        Value::String(text) => text,
        other => serde_json::to_string_pretty(&other)?,
    })
}

/// Stringify and count every value, truncating to `max_tokens_per_item`.
pub fn prepare_items<T: Serialize>(
    values: Vec<T>,
    tokenizer: &dyn Tokenizer,
    max_tokens_per_item: Option<usize>,
) -> Result<Vec<Item<T>>> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let mut text = stringify(&value)?;
            let mut tokens = tokenizer.count(&text);
            if let Some(limit) = max_tokens_per_item {
                if tokens > limit {
                    log::debug!("Truncating item {index} from {tokens} to {limit} tokens");
                    text = tokenizer.truncate(&text, limit);
                    tokens = tokenizer.count(&text);
                }
            }
            Ok(Item {
                index,
                value,
                text,
                tokens,
            })
        })
        .collect()
}
