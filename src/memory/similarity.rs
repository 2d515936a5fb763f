//! Lexical similarity used by the bundled stores
//!
//! Bag-of-words cosine over lowercase alphanumeric tokens. Stands in for the
//! embedding ranking a dedicated memory service would provide.

use crate::models::{MemoryRecord, SearchHit};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Term-frequency vector of a text
pub fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Cosine similarity between two term-frequency vectors
pub fn cosine_similarity(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f32 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm_a: f32 = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

pub fn text_similarity(a: &str, b: &str) -> f32 {
    cosine_similarity(&term_frequencies(a), &term_frequencies(b))
}

/// Score every candidate against `query`, best first
///
/// `candidates` must be in insertion order; equal scores favour the most
/// recent record.
pub fn rank<'a>(
    query: &str,
    candidates: impl Iterator<Item = &'a MemoryRecord>,
    limit: usize,
) -> Vec<SearchHit> {
    let query_terms = term_frequencies(query);

    let mut hits: Vec<(usize, SearchHit)> = candidates
        .enumerate()
        .map(|(position, record)| {
            let score = cosine_similarity(&query_terms, &term_frequencies(&record.document));
            (
                position,
                SearchHit {
                    record: record.clone(),
                    score,
                },
            )
        })
        .collect();

    hits.sort_by(|(pos_a, a), (pos_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| pos_b.cmp(pos_a))
    });

    hits.into_iter().take(limit).map(|(_, hit)| hit).collect()
}
