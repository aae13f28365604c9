// src/matching/curator.rs - Output capping and zone classification
use serde::Serialize;
use std::cmp::Ordering;

use crate::models::matching::{MatchPair, MatchZone};

/// Zone of a similarity given the caller's thresholds. Both bounds are inclusive.
pub fn classify(similarity: f64, definite_threshold: f64, maybe_threshold: f64) -> MatchZone {
    if similarity >= definite_threshold {
        MatchZone::Definite
    } else if similarity >= maybe_threshold {
        MatchZone::Maybe
    } else {
        MatchZone::NotMatch
    }
}

pub fn classify_pair(pair: &MatchPair, definite_threshold: f64, maybe_threshold: f64) -> MatchZone {
    classify(pair.similarity(), definite_threshold, maybe_threshold)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSummary {
    pub definite: usize,
    pub maybe: usize,
    pub not_match: usize,
}

/// Recounts zones for a pair list, e.g. after the user moves a threshold.
pub fn summarize_pairs(
    pairs: &[MatchPair],
    definite_threshold: f64,
    maybe_threshold: f64,
) -> ZoneSummary {
    pairs
        .iter()
        .fold(ZoneSummary::default(), |mut summary, pair| {
            match classify_pair(pair, definite_threshold, maybe_threshold) {
                MatchZone::Definite => summary.definite += 1,
                MatchZone::Maybe => summary.maybe += 1,
                MatchZone::NotMatch => summary.not_match += 1,
            }
            summary
        })
}

pub fn pairs_in_zone<'a>(
    pairs: &'a [MatchPair],
    zone: MatchZone,
    definite_threshold: f64,
    maybe_threshold: f64,
) -> impl Iterator<Item = &'a MatchPair> + 'a {
    pairs
        .iter()
        .filter(move |pair| classify_pair(pair, definite_threshold, maybe_threshold) == zone)
}

fn by_similarity_desc(a: &MatchPair, b: &MatchPair) -> Ordering {
    b.similarity()
        .partial_cmp(&a.similarity())
        .unwrap_or(Ordering::Equal)
}

/// Caps a pair list at `cap` entries, preferring fuzzy matches.
///
/// Fuzzy pairs (similarity below 100) come first in descending similarity.
/// Remaining room is filled with an evenly strided sample of the exact pairs,
/// so the kept exact pairs do not depend on the order they were found in.
pub fn stratified_sort(pairs: Vec<MatchPair>, cap: usize) -> Vec<MatchPair> {
    let (exact, mut fuzzy): (Vec<MatchPair>, Vec<MatchPair>) =
        pairs.into_iter().partition(|p| p.similarity() >= 100.0);
    fuzzy.sort_by(by_similarity_desc);

    if fuzzy.len() >= cap {
        fuzzy.truncate(cap);
        return fuzzy;
    }

    let remaining = cap - fuzzy.len();
    if exact.len() <= remaining {
        fuzzy.extend(exact);
        return fuzzy;
    }

    let len = exact.len();
    let mut slots: Vec<Option<MatchPair>> = exact.into_iter().map(Some).collect();
    for i in 0..remaining {
        let idx = i * len / remaining;
        if let Some(pair) = slots[idx].take() {
            fuzzy.push(pair);
        }
    }
    fuzzy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::Row;

    fn pair(id: usize, similarity: f64) -> MatchPair {
        MatchPair::new(format!("p{}", id), Row::new(), Row::new(), similarity, Vec::new())
    }

    #[test]
    fn test_classify_threshold_edges() {
        assert_eq!(classify(90.0, 90.0, 70.0), MatchZone::Definite);
        assert_eq!(classify(89.9, 90.0, 70.0), MatchZone::Maybe);
        assert_eq!(classify(70.0, 90.0, 70.0), MatchZone::Maybe);
        assert_eq!(classify(69.9, 90.0, 70.0), MatchZone::NotMatch);
    }

    #[test]
    fn test_fuzzy_only_when_fuzzy_fills_cap() {
        let mut pairs: Vec<MatchPair> = (0..30).map(|i| pair(i, 60.0 + i as f64)).collect();
        pairs.extend((30..40).map(|i| pair(i, 100.0)));
        let out = stratified_sort(pairs, 20);
        assert_eq!(out.len(), 20);
        assert!(out.iter().all(|p| p.similarity() < 100.0));
        assert!(out.windows(2).all(|w| w[0].similarity() >= w[1].similarity()));
        assert_eq!(out[0].similarity(), 89.0);
    }

    #[test]
    fn test_exact_matches_are_strided_not_prefixed() {
        let mut pairs: Vec<MatchPair> = (0..100).map(|i| pair(i, 100.0)).collect();
        pairs.push(pair(100, 75.0));
        pairs.push(pair(101, 95.0));
        let out = stratified_sort(pairs, 6);

        let ids: Vec<&str> = out.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["p101", "p100", "p0", "p25", "p50", "p75"]);
    }

    #[test]
    fn test_small_inputs_pass_through() {
        let pairs = vec![pair(0, 100.0), pair(1, 80.0), pair(2, 90.0)];
        let out = stratified_sort(pairs, 10_000);
        let sims: Vec<f64> = out.iter().map(|p| p.similarity()).collect();
        assert_eq!(sims, vec![90.0, 80.0, 100.0]);
    }

    #[test]
    fn test_summary_recomputes_zones() {
        let pairs = vec![pair(0, 100.0), pair(1, 85.0), pair(2, 72.0), pair(3, 60.0)];
        let summary = summarize_pairs(&pairs, 85.0, 70.0);
        assert_eq!(summary, ZoneSummary { definite: 2, maybe: 1, not_match: 1 });
        let maybes: Vec<&str> = pairs_in_zone(&pairs, MatchZone::Maybe, 85.0, 70.0)
            .map(|p| p.id())
            .collect();
        assert_eq!(maybes, vec!["p2"]);
    }
}
