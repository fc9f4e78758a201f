//! Query variant generation.
//!
//! Pure expansion of one raw query into 1..=`max_variants` weighted
//! variants. No I/O happens here; the only inputs are the query string,
//! the pinned trie snapshot, and configuration.

use std::sync::Arc;
use std::time::Instant;

use thai_search_proxy_core::{
    Config, QueryVariant, TokenizationResult, VariantKind, VariantWeights, global_metrics, nfc,
};
use thai_search_proxy_tokenizer::{CompoundTokenizer, TrieSnapshot};

/// Output of variant generation for one request.
#[derive(Debug, Clone)]
pub struct ProcessedQuery {
    pub variants: Vec<QueryVariant>,
    pub tokenization: TokenizationResult,
    /// True when the tokenizer found at least one compound in the query.
    pub contains_compound: bool,
    /// True when generation overran its budget and collapsed to
    /// ORIGINAL-only.
    pub timed_out: bool,
}

/// Variant generation rules (§ query pipeline).
pub struct QueryProcessor {
    weights: VariantWeights,
    max_variants: usize,
    budget_ms: u64,
    split_gated: bool,
    split_min_confidence: f64,
}

impl QueryProcessor {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            weights: config.weights,
            max_variants: config.max_variants,
            budget_ms: config.query_process_timeout_ms,
            split_gated: config.compound_split_gated,
            split_min_confidence: config.compound_split_min_confidence,
        }
    }

    /// Expand `query` into deduplicated, weighted variants.
    #[must_use]
    pub fn process(
        &self,
        query: &str,
        tokenizer: &CompoundTokenizer,
        snapshot: &Arc<TrieSnapshot>,
    ) -> ProcessedQuery {
        let started = Instant::now();
        let metrics = global_metrics();

        let normalized = nfc(query);
        let tokenization = tokenizer.tokenize(query, snapshot);
        let contains_compound = tokenization.has_compound();

        let mut variants = vec![QueryVariant::new(
            normalized.clone(),
            VariantKind::Original,
            self.weights.original,
        )];

        // TOKENISED: only when segmentation actually changed the string.
        let joined = tokenization.content_tokens().join(" ");
        if joined != normalized && !joined.is_empty() {
            let weight = if contains_compound {
                self.weights.tokenised
            } else {
                self.weights.original
            };
            variants.push(QueryVariant::new(joined, VariantKind::Tokenised, weight));
        }

        // COMPOUND_SPLIT: replace compounds by their known components.
        if contains_compound {
            if let Some(text) = self.split_compounds(&tokenization, snapshot) {
                variants.push(QueryVariant::new(
                    text,
                    VariantKind::CompoundSplit,
                    self.weights.compound_split,
                ));
            }
        }

        // FALLBACK_CHAR: the stack exhausted every word segmenter.
        if tokenization.engine == "char" {
            let text = tokenization.content_tokens().join(" ");
            if !text.is_empty() {
                variants.push(QueryVariant::new(
                    text,
                    VariantKind::FallbackChar,
                    self.weights.fallback_char,
                ));
            }
        }

        dedup_by_text(&mut variants);
        variants.truncate(self.max_variants);

        // The budget is cooperative (generation is pure CPU): an overrun
        // collapses the set to ORIGINAL-only after the fact.
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let timed_out = self.budget_ms > 0 && elapsed_ms > self.budget_ms;
        if timed_out {
            metrics.query.timeouts_total.inc();
            variants.truncate(1);
        }

        for variant in &variants {
            match variant.kind {
                VariantKind::Original => metrics.query.variants_original.inc(),
                VariantKind::Tokenised => metrics.query.variants_tokenised.inc(),
                VariantKind::CompoundSplit => metrics.query.variants_compound_split.inc(),
                VariantKind::FallbackChar => metrics.query.variants_fallback_char.inc(),
            }
        }
        metrics
            .query
            .latency_us
            .record(u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX));

        ProcessedQuery {
            variants,
            tokenization,
            contains_compound,
            timed_out,
        }
    }

    /// Build the COMPOUND_SPLIT text, or `None` when no compound in the
    /// query has usable components (unknown, or below the confidence gate).
    fn split_compounds(
        &self,
        tokenization: &TokenizationResult,
        snapshot: &Arc<TrieSnapshot>,
    ) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        let mut replaced = false;
        for (token, is_compound) in tokenization
            .tokens
            .iter()
            .zip(&tokenization.is_compound)
        {
            if token == thai_search_proxy_core::SEPARATOR_TOKEN {
                continue;
            }
            if *is_compound {
                if let Some(entry) = snapshot.get(token) {
                    let allowed =
                        !self.split_gated || entry.confidence >= self.split_min_confidence;
                    if allowed {
                        if let Some(components) = &entry.components {
                            parts.extend(components.iter().cloned());
                            replaced = true;
                            continue;
                        }
                    }
                }
            }
            parts.push(token.clone());
        }
        replaced.then(|| parts.join(" "))
    }
}

/// Drop exact-text duplicates, keeping the first occurrence (ORIGINAL
/// always survives because it is emitted first).
fn dedup_by_text(variants: &mut Vec<QueryVariant>) {
    let mut seen = std::collections::HashSet::new();
    variants.retain(|v| seen.insert(v.text.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use thai_search_proxy_core::CompoundEntry;

    fn tokenizer() -> CompoundTokenizer {
        CompoundTokenizer::from_config(&Config::default()).unwrap()
    }

    fn processor() -> QueryProcessor {
        QueryProcessor::from_config(&Config::default())
    }

    fn snapshot_with(entries: Vec<CompoundEntry>) -> Arc<TrieSnapshot> {
        Arc::new(TrieSnapshot::build(entries, 1))
    }

    fn wakame_with_components() -> CompoundEntry {
        let mut entry = CompoundEntry::new("วากาเมะ", "thai_japanese");
        entry.components = Some(vec!["วา".into(), "กา".into(), "เมะ".into()]);
        entry.confidence = 0.9;
        entry
    }

    #[test]
    fn original_always_first() {
        let snap = snapshot_with(vec![]);
        let out = processor().process("สวัสดี", &tokenizer(), &snap);
        assert_eq!(out.variants[0].kind, VariantKind::Original);
        assert_eq!(out.variants[0].text, "สวัสดี");
        assert!((out.variants[0].weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tokenised_emitted_when_segmentation_changes_string() {
        let snap = snapshot_with(vec![]);
        let out = processor().process("สวัสดีครับ", &tokenizer(), &snap);
        let tokenised = out
            .variants
            .iter()
            .find(|v| v.kind == VariantKind::Tokenised)
            .expect("tokenised variant");
        assert_eq!(tokenised.text, "สวัสดี ครับ");
        // No compound in the query → tokenised keeps the original weight.
        assert!((tokenised.weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tokenised_skipped_when_identical() {
        let snap = snapshot_with(vec![]);
        // A single lexicon word segments to itself.
        let out = processor().process("สวัสดี", &tokenizer(), &snap);
        assert!(out.variants.iter().all(|v| v.kind != VariantKind::Tokenised));
    }

    #[test]
    fn compound_query_gets_boosted_tokenised_weight() {
        let snap = snapshot_with(vec![wakame_with_components()]);
        let out = processor().process("กินวากาเมะ", &tokenizer(), &snap);
        assert!(out.contains_compound);
        let tokenised = out
            .variants
            .iter()
            .find(|v| v.kind == VariantKind::Tokenised)
            .expect("tokenised variant");
        assert!((tokenised.weight - 1.2).abs() < f64::EPSILON);
    }

    #[test]
    fn compound_split_uses_components() {
        let snap = snapshot_with(vec![wakame_with_components()]);
        let out = processor().process("กินวากาเมะ", &tokenizer(), &snap);
        let split = out
            .variants
            .iter()
            .find(|v| v.kind == VariantKind::CompoundSplit)
            .expect("compound split variant");
        assert_eq!(split.text, "กิน วา กา เมะ");
        assert!((split.weight - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn compound_split_skipped_without_components() {
        let snap = snapshot_with(vec![CompoundEntry::new("วากาเมะ", "thai_japanese")]);
        let out = processor().process("กินวากาเมะ", &tokenizer(), &snap);
        assert!(out
            .variants
            .iter()
            .all(|v| v.kind != VariantKind::CompoundSplit));
    }

    #[test]
    fn compound_split_respects_confidence_gate() {
        let mut entry = wakame_with_components();
        entry.confidence = 0.2; // below the 0.5 default gate
        let snap = snapshot_with(vec![entry]);
        let out = processor().process("กินวากาเมะ", &tokenizer(), &snap);
        assert!(out
            .variants
            .iter()
            .all(|v| v.kind != VariantKind::CompoundSplit));

        // Ungated config allows it again.
        let config = Config {
            compound_split_gated: false,
            ..Config::default()
        };
        let out = QueryProcessor::from_config(&config).process("กินวากาเมะ", &tokenizer(), &snap);
        assert!(out
            .variants
            .iter()
            .any(|v| v.kind == VariantKind::CompoundSplit));
    }

    #[test]
    fn variants_are_deduplicated_by_text() {
        let snap = snapshot_with(vec![]);
        // ASCII-only input: tokenised join equals the original string.
        let out = processor().process("sushi", &tokenizer(), &snap);
        let texts: Vec<&str> = out.variants.iter().map(|v| v.text.as_str()).collect();
        let mut unique = texts.clone();
        unique.dedup();
        assert_eq!(texts, unique);
        assert_eq!(out.variants.len(), 1);
    }

    #[test]
    fn max_variants_is_enforced() {
        let config = Config {
            max_variants: 1,
            ..Config::default()
        };
        let snap = snapshot_with(vec![wakame_with_components()]);
        let out =
            QueryProcessor::from_config(&config).process("กินวากาเมะ", &tokenizer(), &snap);
        assert_eq!(out.variants.len(), 1);
        assert_eq!(out.variants[0].kind, VariantKind::Original);
    }

    #[test]
    fn query_is_nfc_normalized() {
        let snap = snapshot_with(vec![]);
        let out = processor().process("cafe\u{0301}", &tokenizer(), &snap);
        assert_eq!(out.variants[0].text, "café");
    }

    #[test]
    fn generation_is_pure_and_deterministic() {
        let snap = snapshot_with(vec![wakame_with_components()]);
        let tok = tokenizer();
        let p = processor();
        let a = p.process("ฉันกินสาหร่ายวากาเมะ", &tok, &snap);
        let b = p.process("ฉันกินสาหร่ายวากาเมะ", &tok, &snap);
        assert_eq!(a.variants, b.variants);
    }
}
