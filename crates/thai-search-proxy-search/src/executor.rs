//! Concurrent variant dispatch with bounded admission.
//!
//! A fixed pool of worker threads drains a bounded job queue; each job is
//! one query variant. The queue bound is the backpressure knob: when it is
//! full, `try_send` fails and the variant is rejected with `BACKPRESSURE`
//! instead of piling up latency. Replies flow back over a per-request
//! channel that the dispatching thread drains against the global search
//! budget, so a slow variant cannot hold the request past its deadline.

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thai_search_proxy_core::{
    Error, QueryVariant, Result, SearchHit, VariantKind, global_metrics,
};

use crate::backend::VariantSearcher;

/// Outcome of one dispatched variant.
#[derive(Debug)]
pub struct VariantReply {
    pub kind: VariantKind,
    pub weight: f64,
    pub result: Result<Vec<SearchHit>>,
}

enum Job {
    Variant(Box<VariantJob>),
    Shutdown,
}

struct VariantJob {
    variant: QueryVariant,
    index: String,
    fetch_limit: usize,
    timeout_ms: u64,
    reply: SyncSender<VariantReply>,
    enqueued_at: Instant,
}

/// Bounded fan-out pool over a [`VariantSearcher`].
pub struct SearchExecutor {
    sender: SyncSender<Job>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
    pool_size: usize,
}

impl SearchExecutor {
    /// Spawn `pool_size` workers with a queue bounded at `queue_max`.
    #[must_use]
    pub fn new(searcher: Arc<dyn VariantSearcher>, pool_size: usize, queue_max: usize) -> Self {
        let (tx, rx) = sync_channel::<Job>(queue_max.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(pool_size.max(1));
        for worker_id in 0..pool_size.max(1) {
            let rx = Arc::clone(&rx);
            let searcher = Arc::clone(&searcher);
            let handle = std::thread::Builder::new()
                .name(format!("search-worker-{worker_id}"))
                .spawn(move || worker_loop(&rx, searcher.as_ref()))
                .expect("failed to spawn search worker");
            workers.push(handle);
        }
        global_metrics()
            .executor
            .queue_capacity
            .set(queue_max.max(1) as u64);
        Self {
            sender: tx,
            workers: Mutex::new(workers),
            pool_size: pool_size.max(1),
        }
    }

    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Dispatch all variants concurrently and collect replies within
    /// `global_budget`.
    ///
    /// Every variant yields exactly one reply: a backend result, a
    /// `BACKPRESSURE` rejection when the queue was full, or a
    /// `BACKEND_TIMEOUT` when the global budget ran out first.
    #[must_use]
    pub fn dispatch(
        &self,
        variants: Vec<QueryVariant>,
        index: &str,
        fetch_limit: usize,
        variant_timeout_ms: u64,
        global_budget: Duration,
    ) -> Vec<VariantReply> {
        let metrics = global_metrics();
        let total = variants.len();
        let (reply_tx, reply_rx) = sync_channel::<VariantReply>(total.max(1));

        let mut replies: Vec<VariantReply> = Vec::with_capacity(total);
        // Kinds are unique within one request (the processor emits each at
        // most once), so pending work can be tracked per kind.
        let mut pending: Vec<(VariantKind, f64)> = Vec::with_capacity(total);

        for variant in variants {
            metrics.executor.dispatched_total.inc();
            let (kind, weight) = (variant.kind, variant.weight);
            let job = Job::Variant(Box::new(VariantJob {
                variant,
                index: index.to_string(),
                fetch_limit,
                timeout_ms: variant_timeout_ms,
                reply: reply_tx.clone(),
                enqueued_at: Instant::now(),
            }));
            match self.sender.try_send(job) {
                Ok(()) => {
                    metrics.executor.queue_depth.add(1);
                    pending.push((kind, weight));
                }
                Err(TrySendError::Full(Job::Variant(job))) => {
                    metrics.executor.backpressure_total.inc();
                    metrics.executor.failed_total.inc();
                    replies.push(VariantReply {
                        kind: job.variant.kind,
                        weight: job.variant.weight,
                        result: Err(Error::Backpressure),
                    });
                }
                Err(TrySendError::Disconnected(Job::Variant(job))) => {
                    metrics.executor.failed_total.inc();
                    replies.push(VariantReply {
                        kind: job.variant.kind,
                        weight: job.variant.weight,
                        result: Err(Error::Internal("search executor is shut down".to_string())),
                    });
                }
                Err(
                    TrySendError::Full(Job::Shutdown) | TrySendError::Disconnected(Job::Shutdown),
                ) => {}
            }
        }
        drop(reply_tx);

        let deadline = Instant::now() + global_budget;
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match reply_rx.recv_timeout(remaining) {
                Ok(reply) => {
                    if let Some(pos) = pending.iter().position(|(k, _)| *k == reply.kind) {
                        pending.remove(pos);
                    }
                    replies.push(reply);
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        // Variants still in flight after the budget: report as timeouts.
        // Their workers finish in the background; the late replies land in
        // a channel nobody reads and are dropped.
        let budget_ms = u64::try_from(global_budget.as_millis()).unwrap_or(u64::MAX);
        for (kind, weight) in pending {
            metrics.executor.failed_total.inc();
            replies.push(VariantReply {
                kind,
                weight,
                result: Err(Error::BackendTimeout(budget_ms)),
            });
        }

        replies
    }

    /// Stop all workers and join them.
    pub fn shutdown(&self) {
        for _ in 0..self.pool_size {
            let _ = self.sender.send(Job::Shutdown);
        }
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SearchExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: &Arc<Mutex<Receiver<Job>>>, searcher: &dyn VariantSearcher) {
    loop {
        let job = {
            let guard = rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.recv()
        };
        match job {
            Ok(Job::Variant(job)) => {
                let metrics = global_metrics();
                metrics.executor.queue_depth.sub_saturating(1);
                metrics.executor.inflight.add(1);
                let result = searcher.search_variant(
                    &job.variant,
                    &job.index,
                    job.fetch_limit,
                    job.timeout_ms,
                );
                let latency =
                    u64::try_from(job.enqueued_at.elapsed().as_micros()).unwrap_or(u64::MAX);
                metrics.executor.variant_latency_us.record(latency);
                metrics.executor.inflight.sub_saturating(1);
                if result.is_ok() {
                    metrics.executor.completed_total.inc();
                } else {
                    metrics.executor.failed_total.inc();
                    if let Err(err) = &result {
                        tracing::warn!(
                            kind = %job.variant.kind,
                            error = %err,
                            "variant search failed"
                        );
                    }
                }
                let _ = job.reply.try_send(VariantReply {
                    kind: job.variant.kind,
                    weight: job.variant.weight,
                    result,
                });
            }
            Ok(Job::Shutdown) | Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSearcher {
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubSearcher {
        fn ok() -> Self {
            Self {
                delay: Duration::ZERO,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                delay: Duration::ZERO,
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl VariantSearcher for StubSearcher {
        fn search_variant(
            &self,
            variant: &QueryVariant,
            _index: &str,
            _fetch_limit: usize,
            _timeout_ms: u64,
        ) -> Result<Vec<SearchHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.fail {
                return Err(Error::BackendUnavailable("stub".to_string()));
            }
            Ok(vec![SearchHit {
                doc_id: format!("doc-{}", variant.kind),
                raw_score: 0.9,
                variant_kind: variant.kind,
                highlights: None,
                payload: serde_json::json!({}),
            }])
        }

        fn probe(&self, _timeout_ms: u64) -> Result<()> {
            Ok(())
        }
    }

    fn variants(n: usize) -> Vec<QueryVariant> {
        let kinds = [
            VariantKind::Original,
            VariantKind::Tokenised,
            VariantKind::CompoundSplit,
            VariantKind::FallbackChar,
        ];
        (0..n)
            .map(|i| QueryVariant::new(format!("q{i}"), kinds[i % kinds.len()], 1.0))
            .collect()
    }

    #[test]
    fn all_variants_complete() {
        let executor = SearchExecutor::new(Arc::new(StubSearcher::ok()), 4, 32);
        let replies = executor.dispatch(
            variants(3),
            "idx",
            20,
            2000,
            Duration::from_secs(5),
        );
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().all(|r| r.result.is_ok()));
    }

    #[test]
    fn failures_are_per_variant() {
        let executor = SearchExecutor::new(Arc::new(StubSearcher::failing()), 2, 32);
        let replies = executor.dispatch(
            variants(2),
            "idx",
            20,
            2000,
            Duration::from_secs(5),
        );
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r.result.is_err()));
    }

    #[test]
    fn queue_overflow_rejects_with_backpressure() {
        // One worker, queue of one, and a slow searcher: the first job
        // occupies the worker, the second fills the queue, the rest bounce.
        let executor = SearchExecutor::new(
            Arc::new(StubSearcher::slow(Duration::from_millis(150))),
            1,
            1,
        );
        let replies = executor.dispatch(
            variants(6),
            "idx",
            20,
            2000,
            Duration::from_secs(5),
        );
        assert_eq!(replies.len(), 6);
        let rejected = replies
            .iter()
            .filter(|r| matches!(r.result, Err(Error::Backpressure)))
            .count();
        assert!(rejected >= 3, "expected rejections, got {rejected}");
        let completed = replies.iter().filter(|r| r.result.is_ok()).count();
        assert!(completed >= 1);
    }

    #[test]
    fn global_budget_bounds_collection() {
        let executor = SearchExecutor::new(
            Arc::new(StubSearcher::slow(Duration::from_millis(400))),
            2,
            32,
        );
        let started = Instant::now();
        let replies = executor.dispatch(
            variants(2),
            "idx",
            20,
            2000,
            Duration::from_millis(80),
        );
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(replies.len(), 2);
        assert!(replies
            .iter()
            .all(|r| matches!(r.result, Err(Error::BackendTimeout(_)))));
    }

    #[test]
    fn shutdown_joins_workers() {
        let executor = SearchExecutor::new(Arc::new(StubSearcher::ok()), 3, 8);
        executor.shutdown();
        // Further dispatches fail cleanly rather than hanging.
        let replies = executor.dispatch(
            variants(1),
            "idx",
            20,
            2000,
            Duration::from_millis(50),
        );
        assert_eq!(replies.len(), 1);
        assert!(replies[0].result.is_err());
    }
}
