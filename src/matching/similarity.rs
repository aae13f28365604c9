// src/matching/similarity.rs - String similarity scoring on a 0-100 scale
use strsim::levenshtein;

use crate::models::core::Row;
use crate::models::matching::{FieldSimilarity, FieldStatus};

const WINKLER_PREFIX_LIMIT: usize = 4;
const WINKLER_PREFIX_WEIGHT: f64 = 0.1;

/// Rounds a 0.0-1.0 score to a 0-100 percentage with one decimal.
pub fn to_percentage(score: f64) -> f64 {
    (score.clamp(0.0, 1.0) * 1000.0).round() / 10.0
}

/// Jaro similarity over chars.
///
/// The match window is half the length of the shorter string minus one, so a
/// single stray character far into a longer string cannot register as a match.
fn jaro(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let window = (a.len().min(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;

    for (i, ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_matched[j] && b[j] == *ca {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut half_transpositions = 0usize;
    let mut k = 0usize;
    for (i, ca) in a.iter().enumerate() {
        if !a_matched[i] {
            continue;
        }
        while !b_matched[k] {
            k += 1;
        }
        if *ca != b[k] {
            half_transpositions += 1;
        }
        k += 1;
    }

    let m = matches as f64;
    let t = (half_transpositions / 2) as f64;
    (m / a.len() as f64 + m / b.len() as f64 + (m - t) / m) / 3.0
}

/// Case-insensitive Jaro-Winkler similarity in [0, 100], one decimal.
///
/// The Jaro match window is sized from the shorter string, not the longer one,
/// so scores are lower than `strsim::jaro_winkler` for pairs of very different
/// length (Smith/Johnson scores 0.0 here, 44.8 there) and are not comparable
/// with it. Callers decide how empty values score; two equal strings are
/// always 100.
pub fn jaro_winkler_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return 100.0;
    }
    // Order the inputs so the greedy matching is symmetric.
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let first: Vec<char> = first.chars().collect();
    let second: Vec<char> = second.chars().collect();

    let jaro_score = jaro(&first, &second);
    let prefix = first
        .iter()
        .zip(second.iter())
        .take(WINKLER_PREFIX_LIMIT)
        .take_while(|(x, y)| x == y)
        .count();

    let score = jaro_score + prefix as f64 * WINKLER_PREFIX_WEIGHT * (1.0 - jaro_score);
    to_percentage(score)
}

/// Legacy conversion of an edit distance into a 0-100 percentage.
pub fn distance_to_similarity(distance: usize, max_length: usize) -> f64 {
    if max_length == 0 {
        return 100.0;
    }
    let ratio = 1.0 - distance.min(max_length) as f64 / max_length as f64;
    to_percentage(ratio)
}

/// Legacy Levenshtein-derived similarity, case-insensitive.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_length = a.chars().count().max(b.chars().count());
    distance_to_similarity(levenshtein(&a, &b), max_length)
}

/// Scores two already-stringified cell values: equal → 100, one side empty → 0.
pub fn score_values(a: &str, b: &str) -> f64 {
    if a == b {
        100.0
    } else if a.is_empty() || b.is_empty() {
        0.0
    } else {
        jaro_winkler_similarity(a, b)
    }
}

/// Per-column breakdown for a candidate pair.
pub fn calculate_field_similarities(
    row_a: &Row,
    row_b: &Row,
    columns: &[String],
) -> Vec<FieldSimilarity> {
    columns
        .iter()
        .map(|column| {
            let value_a = row_a.text(column);
            let value_b = row_b.text(column);
            let similarity = score_values(&value_a, &value_b);
            FieldSimilarity {
                column: column.clone(),
                value_a,
                value_b,
                similarity,
                status: FieldStatus::from_similarity(similarity),
            }
        })
        .collect()
}
