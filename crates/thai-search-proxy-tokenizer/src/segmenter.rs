//! Thai word segmentation engines.
//!
//! Segmenters handle the text the compound trie did not claim. They are
//! pluggable behind [`ThaiSegmenter`]; the built-in engines are:
//!
//! - `maxmatch` — greedy longest-match over an embedded lexicon, the default
//!   primary. Unknown Thai text degrades to character clusters.
//! - `cluster` — rule-based Thai character clustering, no lexicon.
//! - `script` — splits at Thai/non-Thai script boundaries only.
//! - `char` — per-code-point splitting with non-Thai runs coalesced. Never
//!   fails; always the last resort.
//!
//! Every engine is deterministic for a fixed input and returns spans that
//! cover the input exactly, in order, with no gaps.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use thai_search_proxy_core::{TokenSpan, is_thai_char};
use thiserror::Error;

/// Failure of a single segmentation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmenterError {
    #[error("segmenter '{engine}' exceeded its {budget_ms} ms budget")]
    TimedOut { engine: &'static str, budget_ms: u64 },
    #[error("segmenter '{engine}' failed: {detail}")]
    Failed { engine: &'static str, detail: String },
}

/// A Thai word-boundary detector for non-compound spans.
pub trait ThaiSegmenter: Send + Sync {
    /// Stable engine identifier (used in config and responses).
    fn id(&self) -> &'static str;

    /// Split `text` into spans covering every code point, in order.
    fn segment(&self, text: &str) -> Result<Vec<TokenSpan>, SegmenterError>;
}

// ---------------------------------------------------------------------------
// Thai character classes
// ---------------------------------------------------------------------------

/// Vowels written before the consonant they modify (เ แ โ ใ ไ).
#[inline]
const fn is_leading_vowel(c: char) -> bool {
    matches!(c, '\u{0E40}'..='\u{0E44}')
}

/// Marks that attach to the preceding base: upper/lower vowels, tone marks,
/// thanthakhat, nikhahit, yamakkan, and the following vowels ะ า ำ ๅ.
#[inline]
const fn is_dependent(c: char) -> bool {
    matches!(
        c,
        '\u{0E30}'..='\u{0E3A}' | '\u{0E45}' | '\u{0E47}'..='\u{0E4E}'
    )
}

/// Advance one Thai character cluster starting at `i`; returns the end index.
///
/// A cluster is: optional leading vowel, a base character, then any run of
/// dependent marks. Isolated dependents (malformed text) form their own
/// cluster so coverage never breaks.
fn cluster_end(chars: &[char], i: usize) -> usize {
    let n = chars.len();
    let mut j = i;
    if is_leading_vowel(chars[j]) {
        j += 1;
        if j == n || !is_thai_char(chars[j]) {
            return j;
        }
    }
    // Base character (consonant, ฤ/ฦ, digit, or stray dependent).
    j += 1;
    while j < n && is_thai_char(chars[j]) && is_dependent(chars[j]) {
        j += 1;
    }
    j
}

/// Push the span for a run of non-Thai characters (single span), stopping at
/// whitespace boundaries so callers see whitespace runs separately.
fn push_non_thai_run(chars: &[char], start: usize, spans: &mut Vec<TokenSpan>) -> usize {
    let n = chars.len();
    let ws = chars[start].is_whitespace();
    let mut j = start;
    while j < n && !is_thai_char(chars[j]) && chars[j].is_whitespace() == ws {
        j += 1;
    }
    spans.push(TokenSpan::new(start, j));
    j
}

// ---------------------------------------------------------------------------
// maxmatch — lexicon-based greedy longest match
// ---------------------------------------------------------------------------

struct Lexicon {
    words: std::collections::HashSet<String>,
    max_len: usize,
}

static LEXICON: LazyLock<Lexicon> = LazyLock::new(|| {
    let mut words = std::collections::HashSet::new();
    let mut max_len = 1;
    for line in include_str!("../data/lexicon_th.txt").lines() {
        let word = line.trim();
        if word.is_empty() || word.starts_with('#') {
            continue;
        }
        max_len = max_len.max(word.chars().count());
        words.insert(word.to_string());
    }
    Lexicon { words, max_len }
});

/// Greedy longest-match segmenter over the embedded lexicon.
pub struct MaxMatchSegmenter;

impl ThaiSegmenter for MaxMatchSegmenter {
    fn id(&self) -> &'static str {
        "maxmatch"
    }

    fn segment(&self, text: &str) -> Result<Vec<TokenSpan>, SegmenterError> {
        let chars: Vec<char> = text.chars().collect();
        let lexicon = &*LEXICON;
        let n = chars.len();
        let mut spans = Vec::new();
        let mut i = 0;
        let mut probe = String::new();
        while i < n {
            if !is_thai_char(chars[i]) {
                i = push_non_thai_run(&chars, i, &mut spans);
                continue;
            }
            let ceiling = lexicon.max_len.min(n - i);
            let mut matched = 0;
            for len in (1..=ceiling).rev() {
                probe.clear();
                probe.extend(&chars[i..i + len]);
                if lexicon.words.contains(&probe) {
                    matched = len;
                    break;
                }
            }
            let end = if matched > 0 {
                i + matched
            } else {
                // Unknown Thai text: fall back to one character cluster.
                cluster_end(&chars, i)
            };
            spans.push(TokenSpan::new(i, end));
            i = end;
        }
        Ok(spans)
    }
}

// ---------------------------------------------------------------------------
// cluster — rule-based clustering, no lexicon
// ---------------------------------------------------------------------------

/// Splits Thai text into character clusters; non-Thai runs stay whole.
pub struct ClusterSegmenter;

impl ThaiSegmenter for ClusterSegmenter {
    fn id(&self) -> &'static str {
        "cluster"
    }

    fn segment(&self, text: &str) -> Result<Vec<TokenSpan>, SegmenterError> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut spans = Vec::new();
        let mut i = 0;
        while i < n {
            if is_thai_char(chars[i]) {
                let end = cluster_end(&chars, i);
                spans.push(TokenSpan::new(i, end));
                i = end;
            } else {
                i = push_non_thai_run(&chars, i, &mut spans);
            }
        }
        Ok(spans)
    }
}

// ---------------------------------------------------------------------------
// script — script-run splitting
// ---------------------------------------------------------------------------

/// Splits only at Thai/non-Thai/whitespace boundaries.
pub struct ScriptSegmenter;

impl ThaiSegmenter for ScriptSegmenter {
    fn id(&self) -> &'static str {
        "script"
    }

    fn segment(&self, text: &str) -> Result<Vec<TokenSpan>, SegmenterError> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut spans = Vec::new();
        let mut i = 0;
        while i < n {
            if is_thai_char(chars[i]) {
                let mut j = i;
                while j < n && is_thai_char(chars[j]) {
                    j += 1;
                }
                spans.push(TokenSpan::new(i, j));
                i = j;
            } else {
                i = push_non_thai_run(&chars, i, &mut spans);
            }
        }
        Ok(spans)
    }
}

// ---------------------------------------------------------------------------
// char — always-succeeds last resort
// ---------------------------------------------------------------------------

/// One span per Thai code point; non-Thai runs coalesced.
pub struct CharLevelSegmenter;

impl ThaiSegmenter for CharLevelSegmenter {
    fn id(&self) -> &'static str {
        "char"
    }

    fn segment(&self, text: &str) -> Result<Vec<TokenSpan>, SegmenterError> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut spans = Vec::new();
        let mut i = 0;
        while i < n {
            if is_thai_char(chars[i]) {
                spans.push(TokenSpan::new(i, i + 1));
                i += 1;
            } else {
                i = push_non_thai_run(&chars, i, &mut spans);
            }
        }
        Ok(spans)
    }
}

// ---------------------------------------------------------------------------
// Registry + fallback stack
// ---------------------------------------------------------------------------

/// Engine names accepted in `SEGMENTER_PRIMARY` / `SEGMENTER_FALLBACKS`.
pub const ENGINE_NAMES: &[&str] = &["maxmatch", "cluster", "script", "char"];

/// Resolve an engine by its config name.
#[must_use]
pub fn engine_by_name(name: &str) -> Option<Arc<dyn ThaiSegmenter>> {
    match name {
        "maxmatch" => Some(Arc::new(MaxMatchSegmenter)),
        "cluster" => Some(Arc::new(ClusterSegmenter)),
        "script" => Some(Arc::new(ScriptSegmenter)),
        "char" => Some(Arc::new(CharLevelSegmenter)),
        _ => None,
    }
}

/// Result of running the fallback chain once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOutcome {
    pub spans: Vec<TokenSpan>,
    /// Engine that produced the spans.
    pub engine: &'static str,
    /// How many engines failed before one succeeded.
    pub fallbacks: u32,
    /// True when every configured engine failed and the char-level engine
    /// was forced in as the last resort.
    pub char_level_forced: bool,
}

/// PRIMARY → fallbacks → CHAR_LEVEL selection policy.
///
/// Each engine gets `budget` wall time; an engine that errors or overruns
/// its budget is skipped with a warning. The char-level engine terminates
/// the chain and cannot fail.
pub struct SegmenterStack {
    chain: Vec<Arc<dyn ThaiSegmenter>>,
    budget: Duration,
}

impl SegmenterStack {
    /// Build a stack from engine instances. The char-level engine is
    /// appended automatically when not already last.
    #[must_use]
    pub fn new(chain: Vec<Arc<dyn ThaiSegmenter>>, budget_ms: u64) -> Self {
        let mut chain = chain;
        if chain.last().is_none_or(|e| e.id() != "char") {
            chain.push(Arc::new(CharLevelSegmenter));
        }
        Self {
            chain,
            budget: Duration::from_millis(budget_ms),
        }
    }

    /// Build a stack from config names. Unknown names list the valid set.
    pub fn from_config(
        primary: &str,
        fallbacks: &[String],
        budget_ms: u64,
    ) -> thai_search_proxy_core::Result<Self> {
        let mut chain = Vec::with_capacity(fallbacks.len() + 1);
        for name in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
            let engine = engine_by_name(name).ok_or_else(|| {
                thai_search_proxy_core::Error::InvalidInput(format!(
                    "unknown segmenter '{name}' (expected one of: {})",
                    ENGINE_NAMES.join(", ")
                ))
            })?;
            chain.push(engine);
        }
        Ok(Self::new(chain, budget_ms))
    }

    /// Identifier of the primary engine.
    #[must_use]
    pub fn primary_id(&self) -> &'static str {
        self.chain[0].id()
    }

    /// Run the fallback chain on `text`.
    #[must_use]
    pub fn segment(&self, text: &str) -> SegmentOutcome {
        let last = self.chain.len() - 1;
        let mut fallbacks = 0u32;
        for (idx, engine) in self.chain.iter().enumerate() {
            let started = Instant::now();
            match engine.segment(text) {
                Ok(spans) => {
                    // Budget is cooperative: engines are pure CPU, so an
                    // overrun is detected after the fact and falls through.
                    if idx < last
                        && !self.budget.is_zero()
                        && started.elapsed() > self.budget
                    {
                        tracing::warn!(
                            engine = engine.id(),
                            budget_ms = self.budget.as_millis() as u64,
                            "segmenter exceeded budget; trying next engine"
                        );
                        fallbacks += 1;
                        continue;
                    }
                    return SegmentOutcome {
                        spans,
                        engine: engine.id(),
                        fallbacks,
                        char_level_forced: idx == last && idx > 0 && fallbacks as usize == last,
                    };
                }
                Err(err) => {
                    tracing::warn!(engine = engine.id(), error = %err, "segmenter failed");
                    fallbacks += 1;
                }
            }
        }
        // Unreachable in practice: the char-level engine cannot fail.
        SegmentOutcome {
            spans: CharLevelSegmenter
                .segment(text)
                .unwrap_or_default(),
            engine: "char",
            fallbacks,
            char_level_forced: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(spans: &[TokenSpan], text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        spans
            .iter()
            .map(|s| chars[s.start..s.end].iter().collect())
            .collect()
    }

    fn assert_covers(spans: &[TokenSpan], text: &str) {
        let mut pos = 0;
        for span in spans {
            assert_eq!(span.start, pos, "gap before span {span:?} in {text:?}");
            assert!(span.end > span.start);
            pos = span.end;
        }
        assert_eq!(pos, text.chars().count(), "spans do not cover {text:?}");
    }

    #[test]
    fn maxmatch_segments_common_sentence() {
        let spans = MaxMatchSegmenter.segment("ฉันกินสาหร่าย").unwrap();
        assert_covers(&spans, "ฉันกินสาหร่าย");
        assert_eq!(texts(&spans, "ฉันกินสาหร่าย"), vec!["ฉัน", "กิน", "สาหร่าย"]);
    }

    #[test]
    fn maxmatch_greeting() {
        let text = "สวัสดีครับ";
        let spans = MaxMatchSegmenter.segment(text).unwrap();
        assert_eq!(texts(&spans, text), vec!["สวัสดี", "ครับ"]);
    }

    #[test]
    fn maxmatch_prefers_longest_word() {
        // ร้านอาหาร is in the lexicon alongside ร้าน and อาหาร.
        let text = "ร้านอาหารญี่ปุ่น";
        let spans = MaxMatchSegmenter.segment(text).unwrap();
        assert_eq!(texts(&spans, text), vec!["ร้านอาหาร", "ญี่ปุ่น"]);
    }

    #[test]
    fn maxmatch_unknown_text_degrades_to_clusters() {
        let text = "วากาเมะ";
        let spans = MaxMatchSegmenter.segment(text).unwrap();
        assert_covers(&spans, text);
        assert!(spans.len() > 1, "unknown loanword should split");
    }

    #[test]
    fn maxmatch_keeps_ascii_run_whole() {
        let text = "กิน sushi";
        let spans = MaxMatchSegmenter.segment(text).unwrap();
        let tokens = texts(&spans, text);
        assert!(tokens.contains(&"sushi".to_string()));
        assert!(tokens.contains(&"กิน".to_string()));
    }

    #[test]
    fn cluster_groups_leading_vowels() {
        let text = "เมะ";
        let spans = ClusterSegmenter.segment(text).unwrap();
        assert_eq!(texts(&spans, text), vec!["เมะ"]);
    }

    #[test]
    fn cluster_attaches_tone_marks() {
        let text = "น้ำ";
        let spans = ClusterSegmenter.segment(text).unwrap();
        assert_eq!(texts(&spans, text), vec!["น้ำ"]);
    }

    #[test]
    fn script_splits_thai_from_ascii() {
        let text = "ไทยabcไทย";
        let spans = ScriptSegmenter.segment(text).unwrap();
        assert_eq!(texts(&spans, text), vec!["ไทย", "abc", "ไทย"]);
    }

    #[test]
    fn char_level_coalesces_non_thai() {
        let text = "กข sushi";
        let spans = CharLevelSegmenter.segment(text).unwrap();
        assert_eq!(texts(&spans, text), vec!["ก", "ข", " ", "sushi"]);
    }

    #[test]
    fn all_engines_cover_input_exactly() {
        let samples = [
            "ฉันกินสาหร่ายวากาเมะ",
            "hello world",
            "ไทย 123  English ไทย",
            "เเปลก", // doubled leading vowel (common typo)
            "ๆๆๆ",
        ];
        for engine in ENGINE_NAMES {
            let engine = engine_by_name(engine).unwrap();
            for text in samples {
                let spans = engine.segment(text).unwrap();
                assert_covers(&spans, text);
            }
        }
    }

    #[test]
    fn engines_are_deterministic() {
        let text = "ร้านอาหารญี่ปุ่นเสิร์ฟซาชิมิ";
        for name in ENGINE_NAMES {
            let engine = engine_by_name(name).unwrap();
            let a = engine.segment(text).unwrap();
            let b = engine.segment(text).unwrap();
            assert_eq!(a, b, "{name} must be deterministic");
        }
    }

    #[test]
    fn registry_rejects_unknown_names() {
        assert!(engine_by_name("newmm").is_none());
        assert!(SegmenterStack::from_config("bogus", &[], 50).is_err());
    }

    #[test]
    fn stack_appends_char_level() {
        let stack = SegmenterStack::from_config("maxmatch", &[], 50).unwrap();
        let outcome = stack.segment("สวัสดี");
        assert_eq!(outcome.engine, "maxmatch");
        assert_eq!(outcome.fallbacks, 0);
        assert!(!outcome.char_level_forced);
    }

    struct FailingSegmenter;

    impl ThaiSegmenter for FailingSegmenter {
        fn id(&self) -> &'static str {
            "failing"
        }

        fn segment(&self, _text: &str) -> Result<Vec<TokenSpan>, SegmenterError> {
            Err(SegmenterError::Failed {
                engine: "failing",
                detail: "synthetic".to_string(),
            })
        }
    }

    #[test]
    fn stack_falls_back_past_failing_engine() {
        let stack = SegmenterStack::new(
            vec![Arc::new(FailingSegmenter), Arc::new(ScriptSegmenter)],
            50,
        );
        let outcome = stack.segment("ไทยabc");
        assert_eq!(outcome.engine, "script");
        assert_eq!(outcome.fallbacks, 1);
        assert!(!outcome.char_level_forced);
    }

    #[test]
    fn stack_forces_char_level_when_all_fail() {
        let stack = SegmenterStack::new(
            vec![Arc::new(FailingSegmenter), Arc::new(FailingSegmenter)],
            50,
        );
        let outcome = stack.segment("ไทยabc");
        assert_eq!(outcome.engine, "char");
        assert_eq!(outcome.fallbacks, 2);
        assert!(outcome.char_level_forced);
    }
}
