//! Readiness and detailed health endpoints.

use asupersync::http::h1::types::{Request as Http1Request, Response as Http1Response};
use thai_search_proxy_core::{global_metrics, now_micros};

use crate::HttpState;

/// Outcome of the three readiness checks.
struct Checks {
    dictionary_ok: bool,
    segmenter_ok: bool,
    backend_ok: bool,
    degraded: bool,
}

fn run_checks(state: &HttpState) -> Checks {
    let store = state.proxy().store();
    let snapshot = store.snapshot();

    // A snapshot always exists (possibly empty); degraded only flags that
    // the last file load failed.
    let dictionary_ok = true;
    let degraded = store.is_degraded();

    // Synthetic tokenization through the primary engine.
    let segmenter_ok = {
        let result = state.proxy().tokenizer().tokenize("สวัสดี", &snapshot);
        !result.tokens.is_empty()
    };

    // The probe worker refreshes these gauges; stale success counts as down.
    let backend = &global_metrics().backend;
    let probe_window_us = state
        .config()
        .backend_probe_interval_s
        .saturating_mul(2_000_000);
    let last_ok = backend.probe_last_ok_us.load();
    let backend_ok = backend.probe_healthy.load() == 1
        && last_ok > 0
        && now_micros().saturating_sub(last_ok) <= probe_window_us;

    Checks {
        dictionary_ok,
        segmenter_ok,
        backend_ok,
        degraded,
    }
}

pub(crate) fn basic(state: &HttpState, req: &Http1Request) -> Http1Response {
    let checks = run_checks(state);
    let healthy = checks.dictionary_ok && checks.segmenter_ok && checks.backend_ok;
    let body = serde_json::json!({
        "status": if healthy { "ok" } else { "unavailable" },
        "degraded": checks.degraded,
        "checks": {
            "dictionary": checks.dictionary_ok,
            "segmenter": checks.segmenter_ok,
            "backend": checks.backend_ok,
        },
    });
    state.json_response(req, if healthy { 200 } else { 503 }, &body)
}

pub(crate) fn detailed(state: &HttpState, req: &Http1Request) -> Http1Response {
    let checks = run_checks(state);
    let healthy = checks.dictionary_ok && checks.segmenter_ok && checks.backend_ok;

    let store = state.proxy().store();
    let snapshot = store.snapshot();
    let metrics = global_metrics().snapshot();

    #[allow(clippy::cast_precision_loss)]
    let backend_error_rate = if metrics.backend.requests_total == 0 {
        0.0
    } else {
        metrics.backend.errors_total as f64 / metrics.backend.requests_total as f64
    };

    let body = serde_json::json!({
        "status": if healthy { "ok" } else { "unavailable" },
        "degraded": checks.degraded,
        "uptime_s": state.uptime_s(),
        "checks": {
            "dictionary": checks.dictionary_ok,
            "segmenter": checks.segmenter_ok,
            "backend": checks.backend_ok,
        },
        "dictionary": {
            "path": store.path().display().to_string(),
            "generation": snapshot.generation(),
            "entry_count": snapshot.len(),
            "fingerprint": snapshot.fingerprint(),
            "built_at": snapshot.built_at(),
            "reloads_total": metrics.dictionary.reloads_total,
            "reload_failures_total": metrics.dictionary.reload_failures_total,
            "last_reload_us": metrics.dictionary.last_reload_us,
        },
        "latencies_us": {
            "http": metrics.http.latency_us,
            "tokenizer": metrics.tokenizer.latency_us,
            "query": metrics.query.latency_us,
            "variant": metrics.executor.variant_latency_us,
            "rank": metrics.search.rank_latency_us,
            "search": metrics.search.search_latency_us,
        },
        "variants": {
            "original": metrics.query.variants_original,
            "tokenised": metrics.query.variants_tokenised,
            "compound_split": metrics.query.variants_compound_split,
            "fallback_char": metrics.query.variants_fallback_char,
        },
        "backend": {
            "requests_total": metrics.backend.requests_total,
            "errors_total": metrics.backend.errors_total,
            "error_rate": backend_error_rate,
            "probe_healthy": metrics.backend.probe_healthy == 1,
            "probe_last_ok_us": metrics.backend.probe_last_ok_us,
        },
        "executor": {
            "dispatched_total": metrics.executor.dispatched_total,
            "completed_total": metrics.executor.completed_total,
            "failed_total": metrics.executor.failed_total,
            "backpressure_total": metrics.executor.backpressure_total,
            "queue_depth": metrics.executor.queue_depth,
            "queue_capacity": metrics.executor.queue_capacity,
            "inflight": metrics.executor.inflight,
        },
    });
    state.json_response(req, if healthy { 200 } else { 503 }, &body)
}
