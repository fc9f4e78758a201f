//! Backend reachability probe.
//!
//! A dedicated thread polls the backend's health endpoint and records the
//! outcome in the global metrics gauges that `/health` reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thai_search_proxy_core::{Config, global_metrics, now_micros};
use thai_search_proxy_search::VariantSearcher;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static WORKER: OnceLock<std::thread::JoinHandle<()>> = OnceLock::new();

const PROBE_TIMEOUT_MS: u64 = 2_000;

pub fn start(config: &Config, searcher: Arc<dyn VariantSearcher>) {
    let interval = Duration::from_secs(config.backend_probe_interval_s.max(1));
    let _ = WORKER.get_or_init(|| {
        SHUTDOWN.store(false, Ordering::Release);
        std::thread::Builder::new()
            .name("backend-probe".into())
            .spawn(move || probe_loop(searcher.as_ref(), interval))
            .expect("failed to spawn backend probe")
    });
}

pub fn shutdown() {
    SHUTDOWN.store(true, Ordering::Release);
}

fn record(ok: bool) {
    let backend = &global_metrics().backend;
    backend.probe_healthy.set(u64::from(ok));
    if ok {
        backend.probe_last_ok_us.set(now_micros());
    }
}

fn probe_loop(searcher: &dyn VariantSearcher, interval: Duration) {
    tracing::info!(
        interval_s = interval.as_secs(),
        "backend probe started"
    );

    // Seed the gauges immediately so health does not stay red for a full
    // interval after startup.
    match searcher.probe(PROBE_TIMEOUT_MS) {
        Ok(()) => record(true),
        Err(err) => {
            record(false);
            tracing::warn!(error = %err, "initial backend probe failed");
        }
    }

    loop {
        let mut remaining = interval;
        while !remaining.is_zero() {
            if SHUTDOWN.load(Ordering::Acquire) {
                tracing::info!("backend probe shutting down");
                return;
            }
            let chunk = remaining.min(Duration::from_millis(500));
            std::thread::sleep(chunk);
            remaining = remaining.saturating_sub(chunk);
        }

        match searcher.probe(PROBE_TIMEOUT_MS) {
            Ok(()) => record(true),
            Err(err) => {
                record(false);
                tracing::debug!(error = %err, "backend probe failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_gauges() {
        record(true);
        let snap = global_metrics().snapshot();
        assert_eq!(snap.backend.probe_healthy, 1);
        assert!(snap.backend.probe_last_ok_us > 0);

        let before = global_metrics().snapshot().backend.probe_last_ok_us;
        record(false);
        let snap = global_metrics().snapshot();
        assert_eq!(snap.backend.probe_healthy, 0);
        // Last-ok timestamp survives a failed probe.
        assert_eq!(snap.backend.probe_last_ok_us, before);
    }
}
