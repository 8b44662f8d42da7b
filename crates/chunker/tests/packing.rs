use context_chunker::{prepare_items, split_tokens, Chunker, ChunkerConfig, HeuristicTokenizer};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn hundred_items_of_fifty_tokens_make_ten_chunks() {
    let tokenizer = HeuristicTokenizer::default();
    let values: Vec<String> = (0..100).map(|i| format!("{i:0>200}")).collect();
    let items = prepare_items(values, &tokenizer, None).unwrap();
    assert!(items.iter().all(|item| item.tokens == 50));

    let chunker = Chunker::new(ChunkerConfig::with_budget(500)).unwrap();
    let chunks = chunker.chunk_items(&items).unwrap();

    assert_eq!(chunks.len(), 10);
    for (n, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.len(), 10);
        assert_eq!(chunk.tokens, 500);
        assert_eq!(chunk.slice(&items)[0].index, n * 10);
    }
}

#[test]
fn token_pieces_reassemble_the_input() {
    let tokenizer = HeuristicTokenizer::default();
    let text = "a long document ".repeat(50);
    let pieces = split_tokens(&text, &tokenizer, 16);
    assert_eq!(pieces.len(), 13);
    assert_eq!(pieces.concat(), text);
}

proptest! {
    #[test]
    fn chunking_preserves_order_and_count(
        counts in prop::collection::vec(0usize..400, 0..200),
        budget in 1usize..1000,
        max_items in prop::option::of(1usize..20),
    ) {
        let config = ChunkerConfig {
            budget_tokens: budget,
            max_items_per_chunk: max_items,
            ..Default::default()
        };
        let chunks = Chunker::new(config).unwrap().plan(&counts).unwrap();

        let mut next = 0;
        for (n, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.index, n);
            prop_assert_eq!(chunk.range.start, next);
            prop_assert!(!chunk.is_empty());
            if let Some(max) = max_items {
                prop_assert!(chunk.len() <= max);
            }
            let tokens: usize = counts[chunk.range.clone()].iter().sum();
            prop_assert_eq!(chunk.tokens, tokens);
            prop_assert!(tokens <= budget || chunk.len() == 1);
            next = chunk.range.end;
        }
        prop_assert_eq!(next, counts.len());
        prop_assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), counts.len());
    }
}
