//! Dictionary file watcher.
//!
//! Polls the dictionary file's metadata on a dedicated thread and funnels
//! reloads through the store's single writer. A failed reload keeps the
//! previous snapshot published; in-flight requests are never affected
//! because they pin their snapshot at entry.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use thai_search_proxy_core::Config;
use thai_search_proxy_tokenizer::DictionaryStore;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static WORKER: OnceLock<std::thread::JoinHandle<()>> = OnceLock::new();

/// File identity used for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    mtime: Option<SystemTime>,
    len: u64,
}

fn stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some(FileStamp {
        mtime: meta.modified().ok(),
        len: meta.len(),
    })
}

#[inline]
fn watch_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.max(100))
}

pub fn start(config: &Config, store: Arc<DictionaryStore>) {
    if !config.dict_watch_enabled {
        return;
    }
    let interval = watch_interval(config.dict_watch_interval_ms);
    let _ = WORKER.get_or_init(|| {
        SHUTDOWN.store(false, Ordering::Release);
        std::thread::Builder::new()
            .name("dict-watcher".into())
            .spawn(move || watch_loop(&store, interval))
            .expect("failed to spawn dictionary watcher")
    });
}

pub fn shutdown() {
    SHUTDOWN.store(true, Ordering::Release);
}

fn watch_loop(store: &DictionaryStore, interval: Duration) {
    tracing::info!(
        path = %store.path().display(),
        interval_ms = interval.as_millis() as u64,
        "dictionary watcher started"
    );
    let mut last = stamp(store.path());

    loop {
        // Sleep in small chunks so shutdown is prompt.
        let mut remaining = interval;
        while !remaining.is_zero() {
            if SHUTDOWN.load(Ordering::Acquire) {
                tracing::info!("dictionary watcher shutting down");
                return;
            }
            let chunk = remaining.min(Duration::from_millis(200));
            std::thread::sleep(chunk);
            remaining = remaining.saturating_sub(chunk);
        }

        let current = stamp(store.path());
        if current == last {
            continue;
        }
        last = current;
        if current.is_none() {
            tracing::warn!(
                path = %store.path().display(),
                "dictionary file disappeared; keeping current snapshot"
            );
            continue;
        }

        match store.reload_from_file() {
            Ok(count) => {
                tracing::info!(
                    entries = count,
                    generation = store.generation(),
                    "dictionary reloaded"
                );
            }
            Err(err) => {
                store.note_reload_failure();
                tracing::warn!(
                    error = %err,
                    "dictionary reload failed; previous snapshot retained"
                );
            }
        }
    }
}
