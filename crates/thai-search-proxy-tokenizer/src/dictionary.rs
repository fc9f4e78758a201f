//! Compound dictionary store: load, validate, mutate, publish.
//!
//! The store owns two entry sets — the primary dictionary file and an
//! overlay fed by the compounds API — and publishes their merge as an
//! immutable [`TrieSnapshot`]. Publication is atomic: readers pin the
//! current `Arc` and keep it for the whole request; a reload or mutation
//! builds the next snapshot off-path and swaps the pointer.
//!
//! All mutations (file reloads included) serialise through one writer
//! mutex, so at most one snapshot build is in progress at a time and
//! queued mutations apply in FIFO order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thai_search_proxy_core::{
    CompoundEntry, DictionaryRowError, EntrySource, Error, Result, global_metrics, nfc, now_micros,
};

use crate::trie::TrieSnapshot;

/// Callback invoked after each snapshot publish.
pub type SnapshotSubscriber = Box<dyn Fn(&Arc<TrieSnapshot>) + Send + Sync>;

/// Writer-side state: the two entry sets the snapshot is merged from.
#[derive(Debug, Default)]
struct WriterState {
    /// Entries from the dictionary file, keyed by NFC surface.
    file_entries: BTreeMap<String, CompoundEntry>,
    /// API-added or API-updated entries, keyed by NFC surface.
    overlay_upserts: BTreeMap<String, CompoundEntry>,
    /// File surfaces removed through the API.
    overlay_removals: BTreeSet<String>,
}

impl WriterState {
    /// Merge file and overlay into the effective entry list.
    ///
    /// Overlay upserts replace file entries with the same surface; overlay
    /// removals drop file entries. Output order follows the BTreeMap key
    /// order, so merging is deterministic.
    fn effective(&self) -> Vec<CompoundEntry> {
        let mut merged: BTreeMap<&str, &CompoundEntry> = BTreeMap::new();
        for (surface, entry) in &self.file_entries {
            if !self.overlay_removals.contains(surface) {
                merged.insert(surface, entry);
            }
        }
        for (surface, entry) in &self.overlay_upserts {
            merged.insert(surface, entry);
        }
        merged.into_values().cloned().collect()
    }

    fn contains(&self, surface: &str) -> bool {
        self.overlay_upserts.contains_key(surface)
            || (self.file_entries.contains_key(surface)
                && !self.overlay_removals.contains(surface))
    }
}

/// The dictionary store. One per process; shared via `Arc`.
pub struct DictionaryStore {
    path: PathBuf,
    writer: Mutex<WriterState>,
    current: RwLock<Arc<TrieSnapshot>>,
    generation: AtomicU64,
    degraded: AtomicBool,
    subscribers: Mutex<Vec<SnapshotSubscriber>>,
}

impl DictionaryStore {
    /// Create a store and attempt the initial load.
    ///
    /// A missing or malformed file leaves the store degraded with an empty
    /// snapshot; the service starts anyway and reports `degraded` in health.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        let store = Arc::new(Self {
            path: path.into(),
            writer: Mutex::new(WriterState::default()),
            current: RwLock::new(Arc::new(TrieSnapshot::empty(0))),
            generation: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        });
        match store.reload_from_file() {
            Ok(count) => {
                tracing::info!(
                    path = %store.path.display(),
                    entries = count,
                    "dictionary loaded"
                );
            }
            Err(err) => {
                store.degraded.store(true, Ordering::Release);
                tracing::warn!(
                    path = %store.path.display(),
                    error = %err,
                    "initial dictionary load failed; starting with empty trie"
                );
            }
        }
        store
    }

    /// Path of the primary dictionary file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pin the current snapshot. Cheap (`Arc` clone); hold for the request.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TrieSnapshot> {
        Arc::clone(
            &self
                .current
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Current generation number (0 until the first successful publish).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// True when the last file load failed and the previous (possibly
    /// empty) snapshot is still being served.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Register a callback for snapshot publishes.
    ///
    /// Callbacks run on the mutating thread while the writer lock is held;
    /// they must not call back into the store.
    pub fn subscribe(&self, callback: SnapshotSubscriber) {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(callback);
    }

    /// Re-read the dictionary file and publish a new snapshot.
    ///
    /// On any parse or validation error the previous snapshot stays
    /// published and the error is returned; nothing is partially applied.
    pub fn reload_from_file(&self) -> Result<usize> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::DictionaryUnreadable(format!("{}: {e}", self.path.display())))?;
        let parsed = parse_dictionary(&raw, &self.path.display().to_string())?;

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writer.file_entries = parsed;
        // File reloads clear removal tombstones: a surface re-added to the
        // file after an API delete is live again. Upserts survive reloads.
        writer.overlay_removals.clear();
        let count = writer.file_entries.len();
        self.publish_locked(&writer);
        drop(writer);

        self.degraded.store(false, Ordering::Release);
        global_metrics().dictionary.reloads_total.inc();
        Ok(count)
    }

    /// Record a failed reload attempt (watcher path).
    pub fn note_reload_failure(&self) {
        global_metrics().dictionary.reload_failures_total.inc();
    }

    /// Add a new overlay entry. Fails with `CONFLICT` on an existing surface.
    pub fn add(&self, mut entry: CompoundEntry) -> Result<CompoundEntry> {
        entry.source = EntrySource::Overlay;
        entry
            .normalize_and_validate()
            .map_err(|reason| Error::InvalidInput(format!("surface {:?}: {reason}", entry.surface)))?;

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if writer.contains(&entry.surface) {
            return Err(Error::DuplicateSurface(entry.surface));
        }
        writer.overlay_removals.remove(&entry.surface);
        writer
            .overlay_upserts
            .insert(entry.surface.clone(), entry.clone());
        self.publish_locked(&writer);
        Ok(entry)
    }

    /// Update an existing entry in place. The path surface and body surface
    /// must agree after NFC normalisation.
    pub fn update(&self, surface: &str, mut entry: CompoundEntry) -> Result<CompoundEntry> {
        let key = nfc(surface.trim());
        entry.source = EntrySource::Overlay;
        entry
            .normalize_and_validate()
            .map_err(|reason| Error::InvalidInput(format!("surface {:?}: {reason}", entry.surface)))?;
        if entry.surface != key {
            return Err(Error::InvalidInput(format!(
                "body surface {:?} does not match path surface {key:?}",
                entry.surface
            )));
        }

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !writer.contains(&key) {
            return Err(Error::CompoundNotFound(key));
        }
        if let Some(existing) = writer
            .overlay_upserts
            .get(&key)
            .or_else(|| writer.file_entries.get(&key))
        {
            entry.created_at = existing.created_at.clone();
        }
        entry.updated_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        writer.overlay_upserts.insert(key, entry.clone());
        self.publish_locked(&writer);
        Ok(entry)
    }

    /// Remove an entry by surface.
    pub fn remove(&self, surface: &str) -> Result<()> {
        let key = nfc(surface.trim());
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !writer.contains(&key) {
            return Err(Error::CompoundNotFound(key));
        }
        writer.overlay_upserts.remove(&key);
        if writer.file_entries.contains_key(&key) {
            writer.overlay_removals.insert(key);
        }
        self.publish_locked(&writer);
        Ok(())
    }

    /// Entry lookup against the current snapshot.
    #[must_use]
    pub fn get(&self, surface: &str) -> Option<CompoundEntry> {
        self.snapshot().get(&nfc(surface.trim())).cloned()
    }

    /// List entries with optional category filter and pagination.
    /// Returns `(page, total_matching)`.
    #[must_use]
    pub fn list(
        &self,
        category: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> (Vec<CompoundEntry>, usize) {
        let snapshot = self.snapshot();
        let matching: Vec<&CompoundEntry> = snapshot
            .entries()
            .iter()
            .filter(|e| category.is_none_or(|c| e.category == c))
            .collect();
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    /// Build and publish a snapshot from the writer state. Caller holds the
    /// writer lock, which is what serialises concurrent builds.
    fn publish_locked(&self, writer: &WriterState) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = Arc::new(TrieSnapshot::build(writer.effective(), generation));

        let metrics = global_metrics();
        metrics.dictionary.generation.set(generation);
        metrics
            .dictionary
            .entry_count
            .set(snapshot.len() as u64);
        metrics.dictionary.last_reload_us.set(now_micros());

        {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *current = Arc::clone(&snapshot);
        }

        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for callback in subscribers.iter() {
            callback(&snapshot);
        }
    }
}

// ---------------------------------------------------------------------------
// File parsing
// ---------------------------------------------------------------------------

/// Parse a dictionary file in either accepted schema:
///
/// 1. Category map: `{ "<category>": ["surface", ...], ... }`
/// 2. Entry list:   `{ "entries": [ {surface, components?, category, ...} ] }`
///
/// Every invalid row is reported; a file with any bad row is rejected whole.
pub fn parse_dictionary(raw: &str, path: &str) -> Result<BTreeMap<String, CompoundEntry>> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::DictionaryUnreadable(format!("{path}: invalid JSON: {e}")))?;
    let serde_json::Value::Object(map) = value else {
        return Err(Error::DictionaryUnreadable(format!(
            "{path}: top level must be a JSON object"
        )));
    };

    let mut rows: Vec<DictionaryRowError> = Vec::new();
    let mut out: BTreeMap<String, CompoundEntry> = BTreeMap::new();

    let mut push_entry = |entry: CompoundEntry, row: String, rows: &mut Vec<DictionaryRowError>| {
        let mut entry = entry;
        match entry.normalize_and_validate() {
            Ok(()) => {
                if out.contains_key(&entry.surface) {
                    rows.push(DictionaryRowError {
                        row,
                        surface: entry.surface.clone(),
                        reason: "duplicate surface after NFC normalization".to_string(),
                    });
                } else {
                    out.insert(entry.surface.clone(), entry);
                }
            }
            Err(reason) => rows.push(DictionaryRowError {
                row,
                surface: entry.surface.clone(),
                reason: reason.to_string(),
            }),
        }
    };

    if let Some(entries) = map.get("entries") {
        // Schema 2: entry list.
        let serde_json::Value::Array(items) = entries else {
            return Err(Error::DictionaryUnreadable(format!(
                "{path}: \"entries\" must be an array"
            )));
        };
        for (idx, item) in items.iter().enumerate() {
            match serde_json::from_value::<CompoundEntry>(item.clone()) {
                Ok(entry) => push_entry(entry, format!("entries[{idx}]"), &mut rows),
                Err(e) => rows.push(DictionaryRowError {
                    row: format!("entries[{idx}]"),
                    surface: item
                        .get("surface")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    reason: format!("malformed entry: {e}"),
                }),
            }
        }
    } else {
        // Schema 1: category map.
        for (category, surfaces) in &map {
            let serde_json::Value::Array(items) = surfaces else {
                rows.push(DictionaryRowError {
                    row: category.clone(),
                    surface: String::new(),
                    reason: "category value must be an array of surfaces".to_string(),
                });
                continue;
            };
            for (idx, item) in items.iter().enumerate() {
                let Some(surface) = item.as_str() else {
                    rows.push(DictionaryRowError {
                        row: format!("{category}[{idx}]"),
                        surface: String::new(),
                        reason: "surface must be a string".to_string(),
                    });
                    continue;
                };
                push_entry(
                    CompoundEntry::new(surface, category.clone()),
                    format!("{category}[{idx}]"),
                    &mut rows,
                );
            }
        }
    }

    if rows.is_empty() {
        Ok(out)
    } else {
        Err(Error::DictionaryLoadFailed {
            path: path.to_string(),
            rows,
        })
    }
}
