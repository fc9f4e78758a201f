//! The compound-aware tokenizer.
//!
//! Walks the input left to right, letting the compound trie claim text
//! first and handing the residue to the segmenter stack. Compounds
//! therefore always win over segmenter word boundaries, including when a
//! compound is a substring of what the segmenter would call one word.

use std::sync::Arc;
use std::time::Instant;

use thai_search_proxy_core::{
    Config, Result, SEPARATOR_TOKEN, TokenSpan, TokenizationResult, WhitespacePolicy,
    contains_thai, global_metrics, nfc,
};

use crate::segmenter::SegmenterStack;
use crate::trie::TrieSnapshot;

/// Long-lived tokenizer capability. Construct once, share by reference;
/// every call pins its own trie snapshot.
pub struct CompoundTokenizer {
    stack: SegmenterStack,
    policy: WhitespacePolicy,
}

impl CompoundTokenizer {
    #[must_use]
    pub fn new(stack: SegmenterStack, policy: WhitespacePolicy) -> Self {
        Self { stack, policy }
    }

    /// Build from config (`SEGMENTER_PRIMARY`, `SEGMENTER_FALLBACKS`,
    /// `SEGMENTER_TIMEOUT_MS`, `WHITESPACE_POLICY`).
    pub fn from_config(config: &Config) -> Result<Self> {
        let stack = SegmenterStack::from_config(
            &config.segmenter_primary,
            &config.segmenter_fallbacks,
            config.segmenter_timeout_ms,
        )?;
        Ok(Self::new(stack, config.whitespace_policy))
    }

    /// Identifier of the primary segmenter engine.
    #[must_use]
    pub fn primary_engine(&self) -> &'static str {
        self.stack.primary_id()
    }

    /// Tokenize `text` against a pinned snapshot.
    #[must_use]
    pub fn tokenize(&self, text: &str, snapshot: &Arc<TrieSnapshot>) -> TokenizationResult {
        let started = Instant::now();
        let metrics = global_metrics();
        metrics.tokenizer.calls_total.inc();

        if text.is_empty() {
            return TokenizationResult::empty(self.stack.primary_id());
        }

        let norm = nfc(text);
        let chars: Vec<char> = norm.chars().collect();
        let mut out = Builder::new(text, &chars, self.policy);

        if contains_thai(&norm) {
            self.walk(&chars, snapshot, &mut out);
        } else {
            // No Thai code points: one segmenter pass, no trie walk.
            let outcome = self.stack.segment(&norm);
            out.note_engine(&outcome);
            for span in outcome.spans {
                out.push_segmented(span);
            }
        }

        let compounds = out.compound_count;
        metrics.tokenizer.compound_tokens_total.add(compounds);
        let elapsed = started.elapsed();
        metrics
            .tokenizer
            .latency_us
            .record(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));

        out.finish(
            self.stack.primary_id(),
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        )
    }

    /// The main scan: whitespace runs, then trie, then segmenter residue.
    fn walk(&self, chars: &[char], snapshot: &Arc<TrieSnapshot>, out: &mut Builder<'_>) {
        let n = chars.len();
        let mut i = 0;
        while i < n {
            if chars[i].is_whitespace() {
                let mut j = i + 1;
                while j < n && chars[j].is_whitespace() {
                    j += 1;
                }
                out.push_whitespace(TokenSpan::new(i, j));
                i = j;
                continue;
            }

            if let Some(hit) = snapshot.longest_match_at(chars, i) {
                out.push_compound(TokenSpan::new(i, i + hit.len));
                i += hit.len;
                continue;
            }

            // Residue: extend to the next whitespace or the next position
            // where a compound begins. Lookups are cheap, so probing each
            // position keeps the scan single-pass.
            let mut j = i + 1;
            while j < n
                && !chars[j].is_whitespace()
                && snapshot.longest_match_at(chars, j).is_none()
            {
                j += 1;
            }
            let residue: String = chars[i..j].iter().collect();
            let outcome = self.stack.segment(&residue);
            out.note_engine(&outcome);
            for span in outcome.spans {
                out.push_segmented(TokenSpan::new(i + span.start, i + span.end));
            }
            i = j;
        }
    }
}

/// Accumulates parallel token/span/flag lists during one call.
struct Builder<'a> {
    original: &'a str,
    chars: &'a [char],
    policy: WhitespacePolicy,
    tokens: Vec<String>,
    spans: Vec<TokenSpan>,
    is_compound: Vec<bool>,
    compound_count: u64,
    engine: Option<&'static str>,
    engine_fallbacks: u32,
}

impl<'a> Builder<'a> {
    fn new(original: &'a str, chars: &'a [char], policy: WhitespacePolicy) -> Self {
        Self {
            original,
            chars,
            policy,
            tokens: Vec::new(),
            spans: Vec::new(),
            is_compound: Vec::new(),
            compound_count: 0,
            engine: None,
            engine_fallbacks: 0,
        }
    }

    fn slice(&self, span: TokenSpan) -> String {
        self.chars[span.start..span.end].iter().collect()
    }

    fn push_compound(&mut self, span: TokenSpan) {
        self.tokens.push(self.slice(span));
        self.spans.push(span);
        self.is_compound.push(true);
        self.compound_count += 1;
    }

    fn push_whitespace(&mut self, span: TokenSpan) {
        match self.policy {
            WhitespacePolicy::Collapse => {
                self.tokens.push(SEPARATOR_TOKEN.to_string());
                self.spans.push(span);
                self.is_compound.push(false);
            }
            WhitespacePolicy::Elide => {}
        }
    }

    fn push_segmented(&mut self, span: TokenSpan) {
        if self.chars[span.start].is_whitespace() {
            self.push_whitespace(span);
            return;
        }
        self.tokens.push(self.slice(span));
        self.spans.push(span);
        self.is_compound.push(false);
    }

    /// Record which engine handled a residue; the deepest fallback wins so
    /// the result reports the weakest engine that contributed.
    fn note_engine(&mut self, outcome: &crate::segmenter::SegmentOutcome) {
        let metrics = global_metrics();
        metrics
            .tokenizer
            .segmenter_fallbacks_total
            .add(u64::from(outcome.fallbacks));
        if outcome.char_level_forced {
            metrics.tokenizer.char_level_total.inc();
        }
        if self.engine.is_none() || outcome.fallbacks >= self.engine_fallbacks {
            self.engine = Some(outcome.engine);
            self.engine_fallbacks = outcome.fallbacks;
        }
    }

    fn finish(self, primary: &'static str, elapsed_ms: u64) -> TokenizationResult {
        TokenizationResult {
            original: self.original.to_string(),
            tokens: self.tokens,
            spans: self.spans,
            is_compound: self.is_compound,
            engine: self.engine.unwrap_or(primary).to_string(),
            elapsed_ms,
        }
    }
}
