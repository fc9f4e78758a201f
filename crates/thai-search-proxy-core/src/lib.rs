//! Core types, configuration, and metrics for the Thai search proxy.
//!
//! This crate provides:
//! - Configuration management (`Config`, environment parsing)
//! - The shared data model (dictionary entries, tokenization output,
//!   query variants, ranked results)
//! - Structured error kinds with HTTP status mapping
//! - Lock-free per-stage metrics

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;

pub use config::{Config, VariantWeights, WhitespacePolicy};
pub use error::{DictionaryRowError, Error, Result};
pub use metrics::{
    Counter, GaugeU64, GlobalMetrics, GlobalMetricsSnapshot, HistogramSnapshot, Log2Histogram,
    global_metrics, now_micros,
};
pub use model::{
    CompoundEntry, EntryInvalid, EntrySource, QueryVariant, RankedHit, RankedResult, ScoreExplain,
    SEPARATOR_TOKEN, SearchHit, SURFACE_MAX_CODE_POINTS, SURFACE_MIN_CODE_POINTS, TokenSpan,
    TokenizationResult, VariantContribution, VariantKind, contains_thai, is_thai_char, nfc,
};
