//! Shared data model for the Thai search proxy.
//!
//! These types cross crate boundaries: dictionary entries, tokenization
//! output, query variants, backend hits, and ranked results. Everything here
//! is plain data with serde derives; behaviour lives in the tokenizer and
//! search crates.

use serde::{Deserialize, Serialize};
use unicode_normalization::{IsNormalized, UnicodeNormalization, is_nfc_quick};

/// Maximum compound surface length in Unicode code points.
pub const SURFACE_MAX_CODE_POINTS: usize = 64;

/// Minimum compound surface length in Unicode code points.
pub const SURFACE_MIN_CODE_POINTS: usize = 2;

/// Whitespace separator token emitted under the `collapse` policy.
///
/// The ranker and query processor treat this token as inert.
pub const SEPARATOR_TOKEN: &str = "\u{2420}";

/// Returns `true` for code points in the Thai block (U+0E00..=U+0E7F).
#[inline]
#[must_use]
pub const fn is_thai_char(c: char) -> bool {
    matches!(c, '\u{0E00}'..='\u{0E7F}')
}

/// Returns `true` if `text` contains at least one Thai code point.
#[must_use]
pub fn contains_thai(text: &str) -> bool {
    text.chars().any(is_thai_char)
}

/// NFC-normalize a string, skipping the allocation when already normalized.
#[must_use]
pub fn nfc(text: &str) -> String {
    if is_nfc_quick(text.chars()) == IsNormalized::Yes {
        text.to_string()
    } else {
        text.nfc().collect()
    }
}

// ---------------------------------------------------------------------------
// Dictionary entries
// ---------------------------------------------------------------------------

/// Where a dictionary entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Loaded from the primary dictionary file.
    #[default]
    File,
    /// Added or updated through the compounds API.
    Overlay,
}

/// One compound dictionary record.
///
/// `surface` is the primary key after NFC normalization. `components` is
/// informational: it feeds COMPOUND_SPLIT variant generation but never
/// affects tokenization itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundEntry {
    pub surface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<String>>,
    pub category: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_language: Option<String>,
    #[serde(default = "now_rfc3339")]
    pub created_at: String,
    #[serde(default = "now_rfc3339")]
    pub updated_at: String,
    #[serde(default)]
    pub source: EntrySource,
}

const fn default_confidence() -> f64 {
    1.0
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// A single reason a dictionary entry failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryInvalid {
    EmptySurface,
    NoThaiCharacters,
    TooShort { code_points: usize },
    TooLong { code_points: usize },
    ConfidenceOutOfRange,
    DuplicateSurface,
}

impl std::fmt::Display for EntryInvalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySurface => f.write_str("surface is empty"),
            Self::NoThaiCharacters => f.write_str("surface contains no Thai characters"),
            Self::TooShort { code_points } => {
                write!(f, "surface has {code_points} code points (minimum {SURFACE_MIN_CODE_POINTS})")
            }
            Self::TooLong { code_points } => {
                write!(f, "surface has {code_points} code points (maximum {SURFACE_MAX_CODE_POINTS})")
            }
            Self::ConfidenceOutOfRange => f.write_str("confidence must be within [0, 1]"),
            Self::DuplicateSurface => f.write_str("duplicate surface after NFC normalization"),
        }
    }
}

impl CompoundEntry {
    /// Build an entry with defaults for the optional fields.
    #[must_use]
    pub fn new(surface: impl Into<String>, category: impl Into<String>) -> Self {
        let ts = now_rfc3339();
        Self {
            surface: surface.into(),
            components: None,
            category: category.into(),
            confidence: default_confidence(),
            origin_language: None,
            created_at: ts.clone(),
            updated_at: ts,
            source: EntrySource::File,
        }
    }

    /// NFC-normalize the surface in place and validate the §3 invariants.
    ///
    /// Duplicate detection is the loader's job; this checks the per-entry
    /// rules only.
    pub fn normalize_and_validate(&mut self) -> Result<(), EntryInvalid> {
        self.surface = nfc(self.surface.trim());
        if self.surface.is_empty() {
            return Err(EntryInvalid::EmptySurface);
        }
        let code_points = self.surface.chars().count();
        if code_points < SURFACE_MIN_CODE_POINTS {
            return Err(EntryInvalid::TooShort { code_points });
        }
        if code_points > SURFACE_MAX_CODE_POINTS {
            return Err(EntryInvalid::TooLong { code_points });
        }
        if !contains_thai(&self.surface) {
            return Err(EntryInvalid::NoThaiCharacters);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(EntryInvalid::ConfidenceOutOfRange);
        }
        if let Some(components) = &mut self.components {
            for part in components.iter_mut() {
                *part = nfc(part.trim());
            }
            components.retain(|part| !part.is_empty());
            if components.is_empty() {
                self.components = None;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tokenization output
// ---------------------------------------------------------------------------

/// Half-open `[start, end)` span in code-point offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

impl TokenSpan {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Output of one tokenization call.
///
/// `tokens`, `spans`, and `is_compound` are parallel lists. Spans are
/// code-point offsets into the NFC form of the input; concatenating the
/// tokens (minus separator tokens) reproduces that NFC form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizationResult {
    pub original: String,
    pub tokens: Vec<String>,
    pub spans: Vec<TokenSpan>,
    pub is_compound: Vec<bool>,
    /// Identifier of the segmenter engine used for non-compound spans.
    pub engine: String,
    pub elapsed_ms: u64,
}

impl TokenizationResult {
    /// Empty result for empty input.
    #[must_use]
    pub fn empty(engine: &str) -> Self {
        Self {
            original: String::new(),
            tokens: Vec::new(),
            spans: Vec::new(),
            is_compound: Vec::new(),
            engine: engine.to_string(),
            elapsed_ms: 0,
        }
    }

    /// Whether any token was resolved through the compound trie.
    #[must_use]
    pub fn has_compound(&self) -> bool {
        self.is_compound.iter().any(|flag| *flag)
    }

    /// Surfaces of the compound tokens, in order.
    #[must_use]
    pub fn compound_tokens(&self) -> Vec<&str> {
        self.tokens
            .iter()
            .zip(&self.is_compound)
            .filter_map(|(token, compound)| compound.then_some(token.as_str()))
            .collect()
    }

    /// Tokens with separator tokens removed (what search variants join).
    #[must_use]
    pub fn content_tokens(&self) -> Vec<&str> {
        self.tokens
            .iter()
            .filter(|token| token.as_str() != SEPARATOR_TOKEN)
            .map(String::as_str)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Query variants
// ---------------------------------------------------------------------------

/// The four variant kinds a raw query can expand into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Original,
    Tokenised,
    CompoundSplit,
    FallbackChar,
}

impl VariantKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Tokenised => "tokenised",
            Self::CompoundSplit => "compound_split",
            Self::FallbackChar => "fallback_char",
        }
    }
}

impl std::fmt::Display for VariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One weighted query variant headed for the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryVariant {
    pub text: String,
    pub kind: VariantKind,
    /// Ranker weight in (0, 2].
    pub weight: f64,
    /// Opaque options forwarded to the backend (filters, sort, limit).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub engine_options: serde_json::Map<String, serde_json::Value>,
}

impl QueryVariant {
    #[must_use]
    pub fn new(text: impl Into<String>, kind: VariantKind, weight: f64) -> Self {
        Self {
            text: text.into(),
            kind,
            weight,
            engine_options: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend hits and ranked output
// ---------------------------------------------------------------------------

/// One hit as returned by the backend for a single variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub raw_score: f64,
    pub variant_kind: VariantKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<serde_json::Value>,
    pub payload: serde_json::Value,
}

/// Per-variant score contribution retained for explain output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantContribution {
    pub kind: VariantKind,
    pub weight: f64,
    pub raw_score: f64,
    /// Raw score rescaled so the top hit of this variant is 1.0.
    pub normalised: f64,
}

/// Scoring breakdown for one ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreExplain {
    /// Best `weight × normalised(raw_score)` over producing variants.
    pub weighted_base: f64,
    pub exact_match_bonus: f64,
    pub compound_match_bonus: f64,
    pub contributions: Vec<VariantContribution>,
}

/// One deduplicated, rescored hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub doc_id: String,
    pub final_score: f64,
    /// Variant kinds that produced this document, deduplicated, in emission order.
    pub produced_by: Vec<VariantKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<serde_json::Value>,
    pub payload: serde_json::Value,
    pub explain: ScoreExplain,
}

/// Final ranker output: deduplicated hits plus pagination bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub hits: Vec<RankedHit>,
    /// Unique documents before pagination was applied.
    pub total_hits: usize,
    pub offset_applied: usize,
    pub limit_applied: usize,
}

impl RankedResult {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            hits: Vec::new(),
            total_hits: 0,
            offset_applied: 0,
            limit_applied: 0,
        }
    }
}
