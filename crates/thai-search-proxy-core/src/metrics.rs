//! Lock-free metrics for the proxy's per-stage counters and timers.
//!
//! Hot-path recording is O(1) on std atomics; snapshotting derives
//! approximate quantiles from log2 buckets. No locks anywhere, so the
//! tokenizer and executor can record from any thread.

use serde::Serialize;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Counter {
    v: AtomicU64,
}

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.v.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct GaugeU64 {
    v: AtomicU64,
}

impl GaugeU64 {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn set(&self, value: u64) {
        self.v.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn sub_saturating(&self, delta: u64) {
        let _ = self
            .v
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(delta))
            });
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Histogram (log2 buckets, microsecond values)
// ---------------------------------------------------------------------------

const BUCKETS: usize = 64;

/// Fixed-bucket histogram: bucket `i` holds values whose bit length is `i`.
#[derive(Debug)]
pub struct Log2Histogram {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub max: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl Default for Log2Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
const fn bucket_of(value: u64) -> usize {
    let bit_length = (u64::BITS - value.leading_zeros()) as usize;
    if bit_length >= BUCKETS {
        BUCKETS - 1
    } else {
        bit_length
    }
}

impl Log2Histogram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record(&self, value: u64) {
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
        self.buckets[bucket_of(value)].fetch_add(1, Ordering::Relaxed);
        // count last, Release: snapshot()'s Acquire load sees the writes above.
        self.count.fetch_add(1, Ordering::Release);
    }

    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Acquire);
        if count == 0 {
            return HistogramSnapshot::default();
        }
        let buckets: [u64; BUCKETS] =
            std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed));
        let max = self.max.load(Ordering::Relaxed);
        HistogramSnapshot {
            count,
            sum: self.sum.load(Ordering::Relaxed),
            max,
            p50: quantile(&buckets, count, 0.50, max),
            p95: quantile(&buckets, count, 0.95, max),
            p99: quantile(&buckets, count, 0.99, max),
        }
    }
}

/// Estimate a quantile as the upper bound of the bucket holding the target
/// rank, clamped to the observed max.
#[allow(clippy::cast_sign_loss, clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn quantile(buckets: &[u64; BUCKETS], count: u64, q: f64, max: u64) -> u64 {
    let target = ((count as f64) * q).ceil() as u64;
    let mut seen = 0u64;
    for (i, n) in buckets.iter().enumerate() {
        seen += n;
        if seen >= target {
            let upper = if i == 0 { 0 } else { (1u64 << i) - 1 };
            return upper.min(max);
        }
    }
    max
}

// ---------------------------------------------------------------------------
// Stage groups
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct HttpMetrics {
    pub requests_total: Counter,
    pub requests_inflight: GaugeU64,
    pub responses_2xx: Counter,
    pub responses_4xx: Counter,
    pub responses_5xx: Counter,
    pub latency_us: Log2Histogram,
}

impl HttpMetrics {
    pub fn record_response(&self, status: u16, latency_us: u64) {
        self.requests_total.inc();
        self.latency_us.record(latency_us);
        match status {
            200..=299 => self.responses_2xx.inc(),
            400..=499 => self.responses_4xx.inc(),
            _ => self.responses_5xx.inc(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TokenizerMetrics {
    pub calls_total: Counter,
    pub compound_tokens_total: Counter,
    pub segmenter_fallbacks_total: Counter,
    pub char_level_total: Counter,
    pub latency_us: Log2Histogram,
}

#[derive(Debug, Default)]
pub struct DictionaryMetrics {
    pub generation: GaugeU64,
    pub entry_count: GaugeU64,
    pub reloads_total: Counter,
    pub reload_failures_total: Counter,
    /// Micros since epoch of the last successful publish; 0 = never.
    pub last_reload_us: GaugeU64,
}

#[derive(Debug, Default)]
pub struct QueryMetrics {
    pub variants_original: Counter,
    pub variants_tokenised: Counter,
    pub variants_compound_split: Counter,
    pub variants_fallback_char: Counter,
    pub timeouts_total: Counter,
    pub latency_us: Log2Histogram,
}

#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    pub dispatched_total: Counter,
    pub completed_total: Counter,
    pub failed_total: Counter,
    pub backpressure_total: Counter,
    pub queue_depth: GaugeU64,
    pub queue_capacity: GaugeU64,
    pub inflight: GaugeU64,
    pub variant_latency_us: Log2Histogram,
}

#[derive(Debug, Default)]
pub struct BackendMetrics {
    pub requests_total: Counter,
    pub errors_total: Counter,
    /// 1 when the last probe succeeded, 0 otherwise.
    pub probe_healthy: GaugeU64,
    /// Micros since epoch of the last successful probe; 0 = never.
    pub probe_last_ok_us: GaugeU64,
}

#[derive(Debug, Default)]
pub struct SearchMetrics {
    pub searches_total: Counter,
    pub partial_total: Counter,
    pub all_failed_total: Counter,
    pub deadline_exceeded_total: Counter,
    pub rank_latency_us: Log2Histogram,
    pub search_latency_us: Log2Histogram,
}

#[derive(Debug, Default)]
pub struct GlobalMetrics {
    pub http: HttpMetrics,
    pub tokenizer: TokenizerMetrics,
    pub dictionary: DictionaryMetrics,
    pub query: QueryMetrics,
    pub executor: ExecutorMetrics,
    pub backend: BackendMetrics,
    pub search: SearchMetrics,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GlobalMetricsSnapshot {
    pub http: HttpSnapshot,
    pub tokenizer: TokenizerSnapshot,
    pub dictionary: DictionarySnapshot,
    pub query: QuerySnapshot,
    pub executor: ExecutorSnapshot,
    pub backend: BackendSnapshot,
    pub search: SearchSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpSnapshot {
    pub requests_total: u64,
    pub requests_inflight: u64,
    pub responses_2xx: u64,
    pub responses_4xx: u64,
    pub responses_5xx: u64,
    pub latency_us: HistogramSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenizerSnapshot {
    pub calls_total: u64,
    pub compound_tokens_total: u64,
    pub segmenter_fallbacks_total: u64,
    pub char_level_total: u64,
    pub latency_us: HistogramSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct DictionarySnapshot {
    pub generation: u64,
    pub entry_count: u64,
    pub reloads_total: u64,
    pub reload_failures_total: u64,
    pub last_reload_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuerySnapshot {
    pub variants_original: u64,
    pub variants_tokenised: u64,
    pub variants_compound_split: u64,
    pub variants_fallback_char: u64,
    pub timeouts_total: u64,
    pub latency_us: HistogramSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorSnapshot {
    pub dispatched_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub backpressure_total: u64,
    pub queue_depth: u64,
    pub queue_capacity: u64,
    pub inflight: u64,
    pub variant_latency_us: HistogramSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub probe_healthy: u64,
    pub probe_last_ok_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchSnapshot {
    pub searches_total: u64,
    pub partial_total: u64,
    pub all_failed_total: u64,
    pub deadline_exceeded_total: u64,
    pub rank_latency_us: HistogramSnapshot,
    pub search_latency_us: HistogramSnapshot,
}

impl GlobalMetrics {
    #[must_use]
    pub fn snapshot(&self) -> GlobalMetricsSnapshot {
        GlobalMetricsSnapshot {
            http: HttpSnapshot {
                requests_total: self.http.requests_total.load(),
                requests_inflight: self.http.requests_inflight.load(),
                responses_2xx: self.http.responses_2xx.load(),
                responses_4xx: self.http.responses_4xx.load(),
                responses_5xx: self.http.responses_5xx.load(),
                latency_us: self.http.latency_us.snapshot(),
            },
            tokenizer: TokenizerSnapshot {
                calls_total: self.tokenizer.calls_total.load(),
                compound_tokens_total: self.tokenizer.compound_tokens_total.load(),
                segmenter_fallbacks_total: self.tokenizer.segmenter_fallbacks_total.load(),
                char_level_total: self.tokenizer.char_level_total.load(),
                latency_us: self.tokenizer.latency_us.snapshot(),
            },
            dictionary: DictionarySnapshot {
                generation: self.dictionary.generation.load(),
                entry_count: self.dictionary.entry_count.load(),
                reloads_total: self.dictionary.reloads_total.load(),
                reload_failures_total: self.dictionary.reload_failures_total.load(),
                last_reload_us: self.dictionary.last_reload_us.load(),
            },
            query: QuerySnapshot {
                variants_original: self.query.variants_original.load(),
                variants_tokenised: self.query.variants_tokenised.load(),
                variants_compound_split: self.query.variants_compound_split.load(),
                variants_fallback_char: self.query.variants_fallback_char.load(),
                timeouts_total: self.query.timeouts_total.load(),
                latency_us: self.query.latency_us.snapshot(),
            },
            executor: ExecutorSnapshot {
                dispatched_total: self.executor.dispatched_total.load(),
                completed_total: self.executor.completed_total.load(),
                failed_total: self.executor.failed_total.load(),
                backpressure_total: self.executor.backpressure_total.load(),
                queue_depth: self.executor.queue_depth.load(),
                queue_capacity: self.executor.queue_capacity.load(),
                inflight: self.executor.inflight.load(),
                variant_latency_us: self.executor.variant_latency_us.snapshot(),
            },
            backend: BackendSnapshot {
                requests_total: self.backend.requests_total.load(),
                errors_total: self.backend.errors_total.load(),
                probe_healthy: self.backend.probe_healthy.load(),
                probe_last_ok_us: self.backend.probe_last_ok_us.load(),
            },
            search: SearchSnapshot {
                searches_total: self.search.searches_total.load(),
                partial_total: self.search.partial_total.load(),
                all_failed_total: self.search.all_failed_total.load(),
                deadline_exceeded_total: self.search.deadline_exceeded_total.load(),
                rank_latency_us: self.search.rank_latency_us.snapshot(),
                search_latency_us: self.search.search_latency_us.snapshot(),
            },
        }
    }
}

static GLOBAL: LazyLock<GlobalMetrics> = LazyLock::new(GlobalMetrics::default);

/// Process-wide metrics instance.
#[must_use]
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL
}

/// Current time in microseconds since the Unix epoch. Infallible.
#[inline]
#[must_use]
pub fn now_micros() -> u64 {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(dur.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basics() {
        let c = Counter::new();
        c.inc();
        c.add(4);
        assert_eq!(c.load(), 5);
    }

    #[test]
    fn gauge_saturating_sub() {
        let g = GaugeU64::new();
        g.set(3);
        g.sub_saturating(10);
        assert_eq!(g.load(), 0);
    }

    #[test]
    fn bucket_of_is_bit_length() {
        assert_eq!(bucket_of(0), 0);
        assert_eq!(bucket_of(1), 1);
        assert_eq!(bucket_of(2), 2);
        assert_eq!(bucket_of(3), 2);
        assert_eq!(bucket_of(1024), 11);
    }

    #[test]
    fn empty_histogram_snapshots_to_zero() {
        let h = Log2Histogram::new();
        assert_eq!(h.snapshot(), HistogramSnapshot::default());
    }

    #[test]
    fn histogram_quantiles_are_ordered_and_bounded() {
        let h = Log2Histogram::new();
        for v in [10, 20, 50, 100, 1000, 5000, 100_000] {
            h.record(v);
        }
        let snap = h.snapshot();
        assert_eq!(snap.count, 7);
        assert_eq!(snap.max, 100_000);
        assert!(snap.p50 <= snap.p95);
        assert!(snap.p95 <= snap.p99);
        assert!(snap.p99 <= snap.max);
    }

    #[test]
    fn histogram_single_value() {
        let h = Log2Histogram::new();
        h.record(42);
        let snap = h.snapshot();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.sum, 42);
        // 42 has bit length 6 → bucket upper bound 63, clamped to max 42
        assert_eq!(snap.p50, 42);
        assert_eq!(snap.p99, 42);
    }

    #[test]
    fn http_status_classification() {
        let m = HttpMetrics::default();
        m.record_response(200, 100);
        m.record_response(204, 100);
        m.record_response(404, 100);
        m.record_response(500, 100);
        m.record_response(502, 100);
        assert_eq!(m.requests_total.load(), 5);
        assert_eq!(m.responses_2xx.load(), 2);
        assert_eq!(m.responses_4xx.load(), 1);
        assert_eq!(m.responses_5xx.load(), 2);
    }

    #[test]
    fn global_snapshot_reflects_recordings() {
        // The global is shared across tests; assert monotonic behaviour only.
        let before = global_metrics().snapshot().tokenizer.calls_total;
        global_metrics().tokenizer.calls_total.inc();
        let after = global_metrics().snapshot().tokenizer.calls_total;
        assert!(after > before);
    }

    #[test]
    fn now_micros_is_positive() {
        assert!(now_micros() > 0);
    }
}
