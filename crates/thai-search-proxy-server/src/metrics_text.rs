//! Prometheus text exposition over the global metrics snapshot.

use std::fmt::Write;

use thai_search_proxy_core::{GlobalMetricsSnapshot, HistogramSnapshot};

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn summary(out: &mut String, name: &str, help: &str, snap: &HistogramSnapshot) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} summary");
    let _ = writeln!(out, "{name}{{quantile=\"0.5\"}} {}", snap.p50);
    let _ = writeln!(out, "{name}{{quantile=\"0.95\"}} {}", snap.p95);
    let _ = writeln!(out, "{name}{{quantile=\"0.99\"}} {}", snap.p99);
    let _ = writeln!(out, "{name}_sum {}", snap.sum);
    let _ = writeln!(out, "{name}_count {}", snap.count);
}

/// Render the snapshot in the Prometheus text exposition format.
#[must_use]
pub fn render(snap: &GlobalMetricsSnapshot) -> String {
    let mut out = String::with_capacity(4096);

    counter(
        &mut out,
        "tsp_http_requests_total",
        "HTTP requests received",
        snap.http.requests_total,
    );
    gauge(
        &mut out,
        "tsp_http_requests_inflight",
        "HTTP requests currently in flight",
        snap.http.requests_inflight,
    );
    counter(
        &mut out,
        "tsp_http_responses_2xx_total",
        "HTTP 2xx responses",
        snap.http.responses_2xx,
    );
    counter(
        &mut out,
        "tsp_http_responses_4xx_total",
        "HTTP 4xx responses",
        snap.http.responses_4xx,
    );
    counter(
        &mut out,
        "tsp_http_responses_5xx_total",
        "HTTP 5xx responses",
        snap.http.responses_5xx,
    );
    summary(
        &mut out,
        "tsp_http_latency_us",
        "HTTP request latency in microseconds",
        &snap.http.latency_us,
    );

    counter(
        &mut out,
        "tsp_tokenizer_calls_total",
        "Tokenization calls",
        snap.tokenizer.calls_total,
    );
    counter(
        &mut out,
        "tsp_tokenizer_compound_tokens_total",
        "Tokens resolved through the compound trie",
        snap.tokenizer.compound_tokens_total,
    );
    counter(
        &mut out,
        "tsp_tokenizer_segmenter_fallbacks_total",
        "Segmenter fallback transitions",
        snap.tokenizer.segmenter_fallbacks_total,
    );
    counter(
        &mut out,
        "tsp_tokenizer_char_level_total",
        "Calls that exhausted every word segmenter",
        snap.tokenizer.char_level_total,
    );
    summary(
        &mut out,
        "tsp_tokenizer_latency_us",
        "Tokenization latency in microseconds",
        &snap.tokenizer.latency_us,
    );

    gauge(
        &mut out,
        "tsp_dictionary_generation",
        "Current dictionary snapshot generation",
        snap.dictionary.generation,
    );
    gauge(
        &mut out,
        "tsp_dictionary_entries",
        "Compound entries in the current snapshot",
        snap.dictionary.entry_count,
    );
    counter(
        &mut out,
        "tsp_dictionary_reloads_total",
        "Successful dictionary reloads",
        snap.dictionary.reloads_total,
    );
    counter(
        &mut out,
        "tsp_dictionary_reload_failures_total",
        "Failed dictionary reloads",
        snap.dictionary.reload_failures_total,
    );

    counter(
        &mut out,
        "tsp_query_variants_original_total",
        "ORIGINAL variants emitted",
        snap.query.variants_original,
    );
    counter(
        &mut out,
        "tsp_query_variants_tokenised_total",
        "TOKENISED variants emitted",
        snap.query.variants_tokenised,
    );
    counter(
        &mut out,
        "tsp_query_variants_compound_split_total",
        "COMPOUND_SPLIT variants emitted",
        snap.query.variants_compound_split,
    );
    counter(
        &mut out,
        "tsp_query_variants_fallback_char_total",
        "FALLBACK_CHAR variants emitted",
        snap.query.variants_fallback_char,
    );

    counter(
        &mut out,
        "tsp_executor_dispatched_total",
        "Variants dispatched to the backend pool",
        snap.executor.dispatched_total,
    );
    counter(
        &mut out,
        "tsp_executor_completed_total",
        "Variants completed successfully",
        snap.executor.completed_total,
    );
    counter(
        &mut out,
        "tsp_executor_failed_total",
        "Variants that failed",
        snap.executor.failed_total,
    );
    counter(
        &mut out,
        "tsp_executor_backpressure_total",
        "Variants rejected by queue backpressure",
        snap.executor.backpressure_total,
    );
    gauge(
        &mut out,
        "tsp_executor_queue_depth",
        "Variants waiting in the executor queue",
        snap.executor.queue_depth,
    );
    gauge(
        &mut out,
        "tsp_executor_queue_capacity",
        "Executor queue capacity",
        snap.executor.queue_capacity,
    );
    summary(
        &mut out,
        "tsp_executor_variant_latency_us",
        "Per-variant backend latency in microseconds",
        &snap.executor.variant_latency_us,
    );

    counter(
        &mut out,
        "tsp_backend_requests_total",
        "Requests sent to the search backend",
        snap.backend.requests_total,
    );
    counter(
        &mut out,
        "tsp_backend_errors_total",
        "Search backend errors",
        snap.backend.errors_total,
    );
    gauge(
        &mut out,
        "tsp_backend_probe_healthy",
        "1 when the last backend probe succeeded",
        snap.backend.probe_healthy,
    );

    counter(
        &mut out,
        "tsp_searches_total",
        "Search requests processed",
        snap.search.searches_total,
    );
    counter(
        &mut out,
        "tsp_searches_partial_total",
        "Searches answered from a subset of variants",
        snap.search.partial_total,
    );
    counter(
        &mut out,
        "tsp_searches_all_failed_total",
        "Searches where every variant failed",
        snap.search.all_failed_total,
    );
    counter(
        &mut out,
        "tsp_request_deadline_exceeded_total",
        "Requests that hit the global deadline",
        snap.search.deadline_exceeded_total,
    );
    summary(
        &mut out,
        "tsp_search_latency_us",
        "End-to-end search latency in microseconds",
        &snap.search.search_latency_us,
    );

    out
}
