//! Property tests for the tokenizer invariants: coverage, compound
//! atomicity, and determinism over arbitrary mixed-script input.

use std::sync::Arc;

use proptest::prelude::*;
use thai_search_proxy_core::{Config, CompoundEntry, TokenizationResult, nfc};
use thai_search_proxy_tokenizer::{CompoundTokenizer, TrieSnapshot};

fn tokenizer() -> CompoundTokenizer {
    CompoundTokenizer::from_config(&Config::default()).unwrap()
}

fn snapshot(surfaces: &[&str]) -> Arc<TrieSnapshot> {
    let entries = surfaces
        .iter()
        .map(|s| CompoundEntry::new(*s, "prop"))
        .collect();
    Arc::new(TrieSnapshot::build(entries, 1))
}

fn content_join(result: &TokenizationResult) -> String {
    result.content_tokens().concat()
}

/// Arbitrary mixed Thai/ASCII text with whitespace.
fn mixed_text() -> impl Strategy<Value = String> {
    let fragments = vec![
        "วากาเมะ", "สาหร่าย", "ซาชิมิ", "กิน", "ข้าว", "ดีมาก", "sushi", " ", "  ", "ก", "เ",
        "42",
    ];
    prop::collection::vec(prop::sample::select(fragments), 0..12)
        .prop_map(|parts| parts.concat())
}

proptest! {
    /// Invariant 1: concatenating content tokens reproduces the NFC input
    /// minus whitespace.
    #[test]
    fn coverage(text in mixed_text()) {
        let snap = snapshot(&["วากาเมะ", "ซาชิมิ", "สาหร่ายวากาเมะ"]);
        let result = tokenizer().tokenize(&text, &snap);
        let expected: String = nfc(&text).chars().filter(|c| !c.is_whitespace()).collect();
        prop_assert_eq!(content_join(&result), expected);
    }

    /// Invariant 1b: spans are contiguous, ordered, and cover the NFC text.
    #[test]
    fn span_contiguity(text in mixed_text()) {
        let snap = snapshot(&["วากาเมะ"]);
        let result = tokenizer().tokenize(&text, &snap);
        let mut pos = 0;
        for span in &result.spans {
            prop_assert_eq!(span.start, pos);
            prop_assert!(span.end > span.start);
            pos = span.end;
        }
        prop_assert_eq!(pos, nfc(&text).chars().count());
    }

    /// Invariant 3: identical input and snapshot produce identical output
    /// (wall time aside).
    #[test]
    fn determinism(text in mixed_text()) {
        let snap = snapshot(&["วากาเมะ", "ซาชิมิ"]);
        let tok = tokenizer();
        let a = tok.tokenize(&text, &snap);
        let b = tok.tokenize(&text, &snap);
        prop_assert_eq!(a.tokens, b.tokens);
        prop_assert_eq!(a.spans, b.spans);
        prop_assert_eq!(a.is_compound, b.is_compound);
        prop_assert_eq!(a.engine, b.engine);
    }

    /// Invariant 2: a compound embedded in arbitrary context is emitted as
    /// one token unless a longer compound strictly covers it.
    #[test]
    fn compound_atomicity(prefix in "[a-z ]{0,8}", suffix in "[a-z ]{0,8}") {
        let snap = snapshot(&["วากาเมะ"]);
        let text = format!("{prefix}วากาเมะ{suffix}");
        let result = tokenizer().tokenize(&text, &snap);
        let found = result
            .tokens
            .iter()
            .zip(&result.is_compound)
            .any(|(t, c)| *c && t == "วากาเมะ");
        prop_assert!(found, "compound must survive in {:?}", text);
    }
}

#[test]
fn longer_compound_strictly_covers_shorter() {
    let snap = snapshot(&["วากาเมะ", "สาหร่ายวากาเมะ"]);
    let result = tokenizer().tokenize("สาหร่ายวากาเมะ", &snap);
    assert_eq!(result.tokens, vec!["สาหร่ายวากาเมะ"]);
}

#[test]
fn parallel_lists_stay_parallel() {
    let snap = snapshot(&["วากาเมะ"]);
    let result = tokenizer().tokenize("กิน วากาเมะ กับ sushi", &snap);
    assert_eq!(result.tokens.len(), result.spans.len());
    assert_eq!(result.tokens.len(), result.is_compound.len());
}
