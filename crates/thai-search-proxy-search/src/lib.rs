//! Query fan-out and ranking pipeline for the Thai search proxy.
//!
//! This crate provides:
//! - Variant generation from a raw query (pure, budgeted)
//! - The Meilisearch backend client and the [`VariantSearcher`] capability
//! - The bounded concurrent executor with backpressure
//! - Deduplicating, weighted re-ranking with deterministic tie-breaks
//! - The per-request orchestrator tying the stages together

#![forbid(unsafe_code)]

pub mod backend;
pub mod executor;
pub mod orchestrator;
pub mod query;
pub mod ranker;

pub use backend::{BackendClient, VariantSearcher};
pub use executor::{SearchExecutor, VariantReply};
pub use orchestrator::{
    BATCH_MAX_QUERIES, BatchItem, SearchOptions, SearchProxy, SearchResponse, TEXT_MAX_CODE_POINTS,
    VariantFailure,
};
pub use query::{ProcessedQuery, QueryProcessor};
pub use ranker::{COMPOUND_MATCH_BONUS, EXACT_MATCH_BONUS, VariantHits, rank};
