//! Compound-aware Thai tokenization.
//!
//! This crate provides:
//! - The compound dictionary store with atomic trie-snapshot publication
//! - The immutable trie index (longest-match lookup)
//! - The segmenter stack (pluggable engines with fallback policy)
//! - The compound-aware tokenizer that ties them together

#![forbid(unsafe_code)]

pub mod dictionary;
pub mod segmenter;
pub mod tokenizer;
pub mod trie;

pub use dictionary::{DictionaryStore, SnapshotSubscriber, parse_dictionary};
pub use segmenter::{
    ENGINE_NAMES, SegmentOutcome, SegmenterError, SegmenterStack, ThaiSegmenter, engine_by_name,
};
pub use tokenizer::CompoundTokenizer;
pub use trie::{TrieMatch, TrieSnapshot, cmp_candidates};
