//! Result deduplication and weighted re-ranking.
//!
//! Hits from every successful variant are merged by `doc_id`, rescored as
//!
//! ```text
//! final = max(weight × normalised(raw)) + exact_match_bonus + compound_match_bonus
//! ```
//!
//! with per-variant max rescaling so one backend quirk cannot dominate,
//! and ordered by a deterministic tie-break chain: score desc → number of
//! producing variants desc → doc_id asc. Pagination applies after ranking.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

use thai_search_proxy_core::{
    RankedHit, RankedResult, ScoreExplain, SearchHit, VariantContribution, VariantKind,
    global_metrics, nfc,
};

/// Bonus when a highlight span reproduces the original query exactly.
pub const EXACT_MATCH_BONUS: f64 = 0.5;

/// Bonus for tokenised/compound-split hits when the query held a compound.
pub const COMPOUND_MATCH_BONUS: f64 = 0.3;

/// Near-tie threshold for float score comparison.
const SCORE_EPSILON: f64 = 1e-9;

/// One successful variant's hits plus its ranking weight.
#[derive(Debug, Clone)]
pub struct VariantHits {
    pub kind: VariantKind,
    pub weight: f64,
    pub hits: Vec<SearchHit>,
}

/// Rank the merged hit set.
///
/// `original_query` feeds the exact-match bonus; `query_had_compound`
/// gates the compound bonus per the scoring contract.
#[must_use]
pub fn rank(
    variant_hits: &[VariantHits],
    original_query: &str,
    query_had_compound: bool,
    offset: usize,
    limit: usize,
) -> RankedResult {
    let started = Instant::now();
    let query = nfc(original_query);

    // doc_id → accumulated state. BTreeMap keeps merge order deterministic.
    let mut merged: BTreeMap<String, Accum> = BTreeMap::new();

    for variant in variant_hits {
        // Per-variant linear rescale: top raw score becomes 1.0.
        let top = variant
            .hits
            .iter()
            .map(|h| h.raw_score)
            .fold(f64::NEG_INFINITY, f64::max);
        for hit in &variant.hits {
            let normalised = if top > 0.0 { hit.raw_score / top } else { 0.0 };
            let accum = merged
                .entry(hit.doc_id.clone())
                .or_insert_with(|| Accum::new(hit));
            accum.absorb(variant, hit, normalised);
        }
    }

    let mut hits: Vec<RankedHit> = merged
        .into_iter()
        .map(|(doc_id, accum)| accum.into_ranked(doc_id, &query, query_had_compound))
        .collect();
    hits.sort_by(ranked_cmp);

    let total_hits = hits.len();
    let hits: Vec<RankedHit> = hits.into_iter().skip(offset).take(limit.max(1)).collect();

    global_metrics()
        .search
        .rank_latency_us
        .record(u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX));

    RankedResult {
        hits,
        total_hits,
        offset_applied: offset,
        limit_applied: limit,
    }
}

/// Deterministic ordering: score desc (epsilon near-ties), producing
/// variant count desc, doc_id asc.
fn ranked_cmp(a: &RankedHit, b: &RankedHit) -> Ordering {
    let diff = b.final_score - a.final_score;
    if diff.abs() > SCORE_EPSILON {
        return if diff > 0.0 {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    b.produced_by
        .len()
        .cmp(&a.produced_by.len())
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

struct Accum {
    produced_by: Vec<VariantKind>,
    contributions: Vec<VariantContribution>,
    highlights: Option<serde_json::Value>,
    payload: serde_json::Value,
}

impl Accum {
    fn new(hit: &SearchHit) -> Self {
        Self {
            produced_by: Vec::new(),
            contributions: Vec::new(),
            highlights: None,
            payload: hit.payload.clone(),
        }
    }

    fn absorb(&mut self, variant: &VariantHits, hit: &SearchHit, normalised: f64) {
        if !self.produced_by.contains(&variant.kind) {
            self.produced_by.push(variant.kind);
        }
        self.contributions.push(VariantContribution {
            kind: variant.kind,
            weight: variant.weight,
            raw_score: hit.raw_score,
            normalised,
        });
        if self.highlights.is_none() {
            self.highlights.clone_from(&hit.highlights);
        }
    }

    fn into_ranked(self, doc_id: String, query: &str, query_had_compound: bool) -> RankedHit {
        let weighted_base = self
            .contributions
            .iter()
            .map(|c| c.weight * c.normalised)
            .fold(0.0, f64::max);

        let exact_match_bonus = if highlight_matches_exactly(self.highlights.as_ref(), query) {
            EXACT_MATCH_BONUS
        } else {
            0.0
        };

        let compound_eligible = self
            .produced_by
            .iter()
            .any(|k| matches!(k, VariantKind::Tokenised | VariantKind::CompoundSplit));
        let compound_match_bonus = if query_had_compound && compound_eligible {
            COMPOUND_MATCH_BONUS
        } else {
            0.0
        };

        RankedHit {
            doc_id,
            final_score: weighted_base + exact_match_bonus + compound_match_bonus,
            produced_by: self.produced_by,
            highlights: self.highlights,
            payload: self.payload,
            explain: ScoreExplain {
                weighted_base,
                exact_match_bonus,
                compound_match_bonus,
                contributions: self.contributions,
            },
        }
    }
}

/// True when any highlight string equals the query after the backend's
/// `<em>` markers are stripped and both sides are NFC.
fn highlight_matches_exactly(highlights: Option<&serde_json::Value>, query: &str) -> bool {
    fn walk(value: &serde_json::Value, query: &str) -> bool {
        match value {
            serde_json::Value::String(s) => {
                let stripped = s.replace("<em>", "").replace("</em>", "");
                nfc(stripped.trim()) == query
            }
            serde_json::Value::Array(items) => items.iter().any(|v| walk(v, query)),
            serde_json::Value::Object(map) => map.values().any(|v| walk(v, query)),
            _ => false,
        }
    }
    highlights.is_some_and(|value| walk(value, query))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc_id: &str, raw: f64, kind: VariantKind) -> SearchHit {
        SearchHit {
            doc_id: doc_id.to_string(),
            raw_score: raw,
            variant_kind: kind,
            highlights: None,
            payload: serde_json::json!({"id": doc_id}),
        }
    }

    fn variant(kind: VariantKind, weight: f64, hits: Vec<SearchHit>) -> VariantHits {
        VariantHits { kind, weight, hits }
    }

    #[test]
    fn fan_out_scoring_matches_contract() {
        // S6: doc X from ORIGINAL (raw 0.9), doc Y from COMPOUND_SPLIT
        // (raw 0.95); weights 1.0 / 0.7; no highlights, no compound bonus.
        let result = rank(
            &[
                variant(VariantKind::Original, 1.0, vec![hit("X", 0.9, VariantKind::Original)]),
                variant(
                    VariantKind::CompoundSplit,
                    0.7,
                    vec![hit("Y", 0.95, VariantKind::CompoundSplit)],
                ),
            ],
            "วากาเมะ",
            false,
            0,
            10,
        );
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].doc_id, "X");
        assert!((result.hits[0].final_score - 1.0).abs() < 1e-9);
        assert_eq!(result.hits[1].doc_id, "Y");
        assert!((result.hits[1].final_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn dedup_retains_all_producing_variants() {
        let result = rank(
            &[
                variant(VariantKind::Original, 1.0, vec![hit("A", 0.8, VariantKind::Original)]),
                variant(VariantKind::Tokenised, 1.2, vec![hit("A", 0.6, VariantKind::Tokenised)]),
            ],
            "q",
            false,
            0,
            10,
        );
        assert_eq!(result.total_hits, 1);
        assert_eq!(
            result.hits[0].produced_by,
            vec![VariantKind::Original, VariantKind::Tokenised]
        );
        // max over variants: both normalise to 1.0 → 1.2 wins.
        assert!((result.hits[0].final_score - 1.2).abs() < 1e-9);
    }

    #[test]
    fn per_variant_normalisation_prevents_scale_domination() {
        // One variant reports huge raw scores; the other tiny ones. After
        // rescaling, both top hits weigh the same.
        let result = rank(
            &[
                variant(
                    VariantKind::Original,
                    1.0,
                    vec![
                        hit("big", 9000.0, VariantKind::Original),
                        hit("big2", 4500.0, VariantKind::Original),
                    ],
                ),
                variant(
                    VariantKind::Tokenised,
                    1.0,
                    vec![hit("small", 0.002, VariantKind::Tokenised)],
                ),
            ],
            "q",
            false,
            0,
            10,
        );
        let big = result.hits.iter().find(|h| h.doc_id == "big").unwrap();
        let small = result.hits.iter().find(|h| h.doc_id == "small").unwrap();
        assert!((big.final_score - small.final_score).abs() < 1e-9);
        let big2 = result.hits.iter().find(|h| h.doc_id == "big2").unwrap();
        assert!((big2.final_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn exact_match_bonus_applies() {
        let mut exact = hit("A", 0.9, VariantKind::Original);
        exact.highlights = Some(serde_json::json!({"title": "<em>วากาเมะ</em>"}));
        let result = rank(
            &[variant(VariantKind::Original, 1.0, vec![exact])],
            "วากาเมะ",
            false,
            0,
            10,
        );
        assert!((result.hits[0].final_score - 1.5).abs() < 1e-9);
        assert!((result.hits[0].explain.exact_match_bonus - 0.5).abs() < 1e-9);
    }

    #[test]
    fn compound_bonus_requires_compound_query_and_eligible_variant() {
        let tokenised = variant(
            VariantKind::Tokenised,
            1.0,
            vec![hit("A", 0.9, VariantKind::Tokenised)],
        );
        let with = rank(&[tokenised.clone()], "q", true, 0, 10);
        assert!((with.hits[0].explain.compound_match_bonus - 0.3).abs() < 1e-9);

        let without = rank(&[tokenised], "q", false, 0, 10);
        assert!((without.hits[0].explain.compound_match_bonus).abs() < 1e-9);

        let original_only = rank(
            &[variant(VariantKind::Original, 1.0, vec![hit("A", 0.9, VariantKind::Original)])],
            "q",
            true,
            0,
            10,
        );
        assert!((original_only.hits[0].explain.compound_match_bonus).abs() < 1e-9);
    }

    #[test]
    fn tie_breaks_by_variant_count_then_doc_id() {
        // B and A tie on score; B is produced by two variants.
        let result = rank(
            &[
                variant(VariantKind::Original, 1.0, vec![
                    hit("A", 1.0, VariantKind::Original),
                    hit("B", 1.0, VariantKind::Original),
                ]),
                variant(VariantKind::Tokenised, 1.0, vec![hit("B", 1.0, VariantKind::Tokenised)]),
            ],
            "q",
            false,
            0,
            10,
        );
        assert_eq!(result.hits[0].doc_id, "B");
        assert_eq!(result.hits[1].doc_id, "A");

        // Pure doc_id tie-break.
        let result = rank(
            &[variant(VariantKind::Original, 1.0, vec![
                hit("zzz", 1.0, VariantKind::Original),
                hit("aaa", 1.0, VariantKind::Original),
            ])],
            "q",
            false,
            0,
            10,
        );
        assert_eq!(result.hits[0].doc_id, "aaa");
    }

    #[test]
    fn pagination_applies_after_ranking() {
        let hits: Vec<SearchHit> = (0..10)
            .map(|i| hit(&format!("doc-{i:02}"), 1.0 - f64::from(i) * 0.05, VariantKind::Original))
            .collect();
        let result = rank(
            &[variant(VariantKind::Original, 1.0, hits)],
            "q",
            false,
            3,
            3,
        );
        assert_eq!(result.total_hits, 10);
        assert_eq!(result.hits.len(), 3);
        assert_eq!(result.hits[0].doc_id, "doc-03");
        assert_eq!(result.offset_applied, 3);
        assert_eq!(result.limit_applied, 3);
    }

    #[test]
    fn zero_raw_scores_normalise_to_zero() {
        let result = rank(
            &[variant(VariantKind::Original, 1.0, vec![hit("A", 0.0, VariantKind::Original)])],
            "q",
            false,
            0,
            10,
        );
        assert!((result.hits[0].final_score).abs() < 1e-9);
    }

    #[test]
    fn empty_input_is_empty_result() {
        let result = rank(&[], "q", false, 0, 10);
        assert!(result.hits.is_empty());
        assert_eq!(result.total_hits, 0);
    }

    #[test]
    fn determinism_over_repeated_runs() {
        let variants = vec![
            variant(VariantKind::Original, 1.0, vec![
                hit("a", 0.9, VariantKind::Original),
                hit("b", 0.9, VariantKind::Original),
                hit("c", 0.5, VariantKind::Original),
            ]),
            variant(VariantKind::Tokenised, 1.2, vec![
                hit("b", 0.7, VariantKind::Tokenised),
                hit("d", 0.7, VariantKind::Tokenised),
            ]),
        ];
        let first: Vec<String> = rank(&variants, "q", true, 0, 10)
            .hits
            .into_iter()
            .map(|h| h.doc_id)
            .collect();
        for _ in 0..50 {
            let order: Vec<String> = rank(&variants, "q", true, 0, 10)
                .hits
                .clone()
                .into_iter()
                .map(|h| h.doc_id)
                .collect();
            assert_eq!(order, first);
        }
    }
}
