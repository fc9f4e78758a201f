//! The per-request pipeline: variants → fan-out → rank → respond.
//!
//! State machine per request:
//!
//! ```text
//! RECEIVED → VARIANTS_READY → DISPATCHED → (ALL_FAILED | PARTIAL | ALL_OK)
//!          → RANKED → RESPONDED
//! ```
//!
//! Partial success is favoured: whenever at least one variant returns
//! hits, the caller gets a 200 with `fallback_used = true` and the failed
//! variants listed in the diagnostic block. The orchestrator is the only
//! component that decides between partial success and a request-level
//! error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thai_search_proxy_core::{
    Config, Error, RankedHit, Result, TokenizationResult, VariantKind, global_metrics, nfc,
};
use thai_search_proxy_tokenizer::{CompoundTokenizer, DictionaryStore};

use crate::backend::VariantSearcher;
use crate::executor::{SearchExecutor, VariantReply};
use crate::query::QueryProcessor;
use crate::ranker::{VariantHits, rank};

/// Maximum queries accepted by one batch-search call.
pub const BATCH_MAX_QUERIES: usize = 32;

/// Maximum query/text length in code points.
pub const TEXT_MAX_CODE_POINTS: usize = 10_000;

/// Per-request options parsed from the search body.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub index_name: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub filters: Option<serde_json::Value>,
    pub sort: Option<serde_json::Value>,
    pub include_tokenization_info: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            index_name: None,
            limit: 20,
            offset: 0,
            filters: None,
            sort: None,
            include_tokenization_info: false,
        }
    }
}

/// A failed variant in the diagnostic block.
#[derive(Debug, Clone, Serialize)]
pub struct VariantFailure {
    pub kind: VariantKind,
    pub error: &'static str,
    pub message: String,
}

/// Successful search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub hits: Vec<RankedHit>,
    pub total_hits: usize,
    pub offset: usize,
    pub limit: usize,
    pub variants_dispatched: usize,
    pub variants_succeeded: usize,
    /// True when any stage degraded: failed variants, variant-generation
    /// timeout, or a degraded dictionary.
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variant_errors: Vec<VariantFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenization: Option<TokenizationResult>,
    pub elapsed_ms: u64,
}

/// One entry of a batch-search response, parallel to the input queries.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Ok(Box<SearchResponse>),
    Err {
        query: String,
        error: String,
        message: String,
    },
}

/// The search proxy pipeline. One per process, shared by the HTTP layer.
pub struct SearchProxy {
    config: Config,
    store: Arc<DictionaryStore>,
    tokenizer: Arc<CompoundTokenizer>,
    processor: QueryProcessor,
    executor: SearchExecutor,
}

impl SearchProxy {
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<DictionaryStore>,
        tokenizer: Arc<CompoundTokenizer>,
        searcher: Arc<dyn VariantSearcher>,
    ) -> Self {
        let processor = QueryProcessor::from_config(&config);
        let executor = SearchExecutor::new(
            searcher,
            config.backend_pool_size,
            config.backend_queue_max,
        );
        Self {
            config,
            store,
            tokenizer,
            processor,
            executor,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<DictionaryStore> {
        &self.store
    }

    #[must_use]
    pub fn tokenizer(&self) -> &Arc<CompoundTokenizer> {
        &self.tokenizer
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Tokenize `text` against the current snapshot (the tokenize API).
    pub fn tokenize(&self, text: &str) -> Result<TokenizationResult> {
        validate_text_length("text", text)?;
        let snapshot = self.store.snapshot();
        Ok(self.tokenizer.tokenize(text, &snapshot))
    }

    /// Run one search request through the full pipeline.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.request_deadline_ms);
        let metrics = global_metrics();
        metrics.search.searches_total.inc();

        validate_text_length("query", query)?;
        if !(1..=100).contains(&options.limit) {
            return Err(Error::InvalidInput(format!(
                "limit must be within 1..=100, got {}",
                options.limit
            )));
        }
        let index = options
            .index_name
            .clone()
            .or_else(|| self.config.backend_index_default.clone())
            .ok_or_else(|| {
                Error::InvalidInput(
                    "index_name is required (no BACKEND_INDEX_DEFAULT configured)".to_string(),
                )
            })?;

        // RECEIVED → VARIANTS_READY. Each request pins one snapshot here
        // and uses it for tokenization and splitting alike.
        let snapshot = self.store.snapshot();
        let processed = self
            .processor
            .process(query, &self.tokenizer, &snapshot);

        let mut variants = processed.variants;
        for variant in &mut variants {
            if let Some(filters) = &options.filters {
                variant
                    .engine_options
                    .insert("filter".to_string(), filters.clone());
            }
            if let Some(sort) = &options.sort {
                variant.engine_options.insert("sort".to_string(), sort.clone());
            }
        }
        let variants_dispatched = variants.len();

        // VARIANTS_READY → DISPATCHED. Stage budgets never exceed what is
        // left of the request deadline.
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            metrics.search.deadline_exceeded_total.inc();
            return Err(Error::DeadlineExceeded(self.config.request_deadline_ms));
        }
        let search_budget = remaining.min(Duration::from_millis(self.config.search_timeout_ms));
        let fetch_limit = (options.offset + options.limit).min(1_000);
        let replies = self.executor.dispatch(
            variants,
            &index,
            fetch_limit,
            self.config.variant_timeout_ms,
            search_budget,
        );

        // DISPATCHED → (ALL_FAILED | PARTIAL | ALL_OK).
        let (succeeded, failures) = partition_replies(replies);
        if succeeded.is_empty() {
            metrics.search.all_failed_total.inc();
            let all_backpressure = !failures.is_empty()
                && failures.iter().all(|f| f.error == "BACKPRESSURE");
            if all_backpressure {
                return Err(Error::Backpressure);
            }
            if Instant::now() >= deadline {
                metrics.search.deadline_exceeded_total.inc();
                return Err(Error::DeadlineExceeded(self.config.request_deadline_ms));
            }
            return Err(Error::AllVariantsFailed);
        }
        let variants_succeeded = succeeded.len();
        if !failures.is_empty() {
            metrics.search.partial_total.inc();
        }

        // → RANKED → RESPONDED.
        let ranked = rank(
            &succeeded,
            query,
            processed.contains_compound,
            options.offset,
            options.limit,
        );

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics
            .search
            .search_latency_us
            .record(u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX));

        let fallback_used =
            !failures.is_empty() || processed.timed_out || self.store.is_degraded();
        Ok(SearchResponse {
            query: nfc(query),
            hits: ranked.hits,
            total_hits: ranked.total_hits,
            offset: options.offset,
            limit: options.limit,
            variants_dispatched,
            variants_succeeded,
            fallback_used,
            variant_errors: failures,
            tokenization: options
                .include_tokenization_info
                .then_some(processed.tokenization),
            elapsed_ms,
        })
    }

    /// Batch search: one entry per query, order preserved, failures
    /// isolated per query.
    pub fn batch_search(&self, queries: &[String], options: &SearchOptions) -> Result<Vec<BatchItem>> {
        if queries.is_empty() || queries.len() > BATCH_MAX_QUERIES {
            return Err(Error::InvalidInput(format!(
                "queries must hold 1..={BATCH_MAX_QUERIES} entries, got {}",
                queries.len()
            )));
        }
        Ok(queries
            .iter()
            .map(|query| match self.search(query, options) {
                Ok(response) => BatchItem::Ok(Box::new(response)),
                Err(err) => BatchItem::Err {
                    query: query.clone(),
                    error: err.error_code().to_string(),
                    message: err.to_string(),
                },
            })
            .collect())
    }

    /// Stop the executor pool.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }
}

fn validate_text_length(field: &str, text: &str) -> Result<()> {
    let code_points = text.chars().count();
    if code_points == 0 {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    if code_points > TEXT_MAX_CODE_POINTS {
        return Err(Error::InvalidInput(format!(
            "{field} exceeds {TEXT_MAX_CODE_POINTS} code points ({code_points})"
        )));
    }
    Ok(())
}

fn partition_replies(replies: Vec<VariantReply>) -> (Vec<VariantHits>, Vec<VariantFailure>) {
    let mut succeeded = Vec::new();
    let mut failures = Vec::new();
    for reply in replies {
        match reply.result {
            Ok(hits) => succeeded.push(VariantHits {
                kind: reply.kind,
                weight: reply.weight,
                hits,
            }),
            Err(err) => failures.push(VariantFailure {
                kind: reply.kind,
                error: err.error_code(),
                message: err.to_string(),
            }),
        }
    }
    (succeeded, failures)
}
