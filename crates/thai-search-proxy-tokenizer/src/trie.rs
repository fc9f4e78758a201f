//! Immutable trie snapshots over the compound dictionary.
//!
//! A [`TrieSnapshot`] is built once per dictionary generation and never
//! mutated afterwards; readers share it through an `Arc` with no locking.
//! Nodes live in a flat arena (`Vec`) with sorted child edges, so a longest
//! match walk is O(match length) binary searches and performs no allocation.

use std::cmp::Ordering;

use sha2::{Digest, Sha256};
use thai_search_proxy_core::CompoundEntry;

/// Arena node. `edges` is sorted by `char` for binary search; `terminal`
/// indexes into the snapshot's entry table when a surface ends here.
#[derive(Debug, Clone, Default)]
struct Node {
    edges: Vec<(char, u32)>,
    terminal: Option<u32>,
}

/// A successful longest-match lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieMatch {
    /// Match length in code points.
    pub len: usize,
    /// Index into [`TrieSnapshot::entries`].
    pub entry: usize,
}

/// Immutable prefix index over one dictionary generation.
#[derive(Debug)]
pub struct TrieSnapshot {
    nodes: Vec<Node>,
    entries: Vec<CompoundEntry>,
    generation: u64,
    fingerprint: String,
    built_at: String,
}

impl TrieSnapshot {
    /// Snapshot with no entries (degraded startup, empty dictionary).
    #[must_use]
    pub fn empty(generation: u64) -> Self {
        Self::build(Vec::new(), generation)
    }

    /// Build a snapshot from validated, deduplicated entries.
    ///
    /// Entries are sorted by surface first so the arena layout, the entry
    /// indices, and the fingerprint are all deterministic for a given set.
    #[must_use]
    pub fn build(mut entries: Vec<CompoundEntry>, generation: u64) -> Self {
        entries.sort_by(|a, b| a.surface.cmp(&b.surface));

        let mut hasher = Sha256::new();
        for entry in &entries {
            hasher.update(entry.surface.as_bytes());
            hasher.update(b"\n");
        }
        let fingerprint = hex::encode(hasher.finalize());

        let mut nodes = vec![Node::default()];
        for (idx, entry) in entries.iter().enumerate() {
            let mut node = 0usize;
            for ch in entry.surface.chars() {
                node = match nodes[node].edges.binary_search_by_key(&ch, |(c, _)| *c) {
                    Ok(pos) => nodes[node].edges[pos].1 as usize,
                    Err(pos) => {
                        let next = nodes.len();
                        nodes.push(Node::default());
                        nodes[node]
                            .edges
                            .insert(pos, (ch, u32::try_from(next).unwrap_or(u32::MAX)));
                        next
                    }
                };
            }
            nodes[node].terminal = Some(u32::try_from(idx).unwrap_or(u32::MAX));
        }

        Self {
            nodes,
            entries,
            generation,
            fingerprint,
            built_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }

    /// Longest surface matching `chars[start..]`, if any.
    ///
    /// Walks edge by edge, remembering the deepest terminal seen. The walk
    /// allocates nothing and visits at most `longest-surface` characters.
    #[must_use]
    pub fn longest_match_at(&self, chars: &[char], start: usize) -> Option<TrieMatch> {
        let mut node = 0usize;
        let mut best: Option<TrieMatch> = None;
        for (offset, ch) in chars[start..].iter().enumerate() {
            let Ok(pos) = self.nodes[node].edges.binary_search_by_key(ch, |(c, _)| *c) else {
                break;
            };
            node = self.nodes[node].edges[pos].1 as usize;
            if let Some(entry) = self.nodes[node].terminal {
                best = Some(TrieMatch {
                    len: offset + 1,
                    entry: entry as usize,
                });
            }
        }
        best
    }

    /// Entry lookup by exact surface.
    #[must_use]
    pub fn get(&self, surface: &str) -> Option<&CompoundEntry> {
        self.entries
            .binary_search_by(|e| e.surface.as_str().cmp(surface))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    #[must_use]
    pub fn entry(&self, idx: usize) -> &CompoundEntry {
        &self.entries[idx]
    }

    /// All entries, sorted by surface.
    #[must_use]
    pub fn entries(&self) -> &[CompoundEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Hex SHA-256 over the sorted surface list.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn built_at(&self) -> &str {
        &self.built_at
    }
}

/// Deterministic preference order between candidate entries:
/// longer surface first, then higher confidence, then lexicographically
/// smaller surface. Surfaces are unique within a snapshot, so inside one
/// trie the chain never goes past the first step; the full chain decides
/// which record wins when file and overlay sets are merged.
#[must_use]
pub fn cmp_candidates(a: &CompoundEntry, b: &CompoundEntry) -> Ordering {
    let a_len = a.surface.chars().count();
    let b_len = b.surface.chars().count();
    b_len
        .cmp(&a_len)
        .then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.surface.cmp(&b.surface))
}
