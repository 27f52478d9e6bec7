//! Score normalization and weighted fusion of two ranked result sets.
//!
//! Each set is min-max scaled to `[0, 1]` on its own, then combined as
//! `w * tensor + (1 - w) * embedding`. A product found by only one search
//! keeps just that weighted term; nothing is filled in for the other side.


use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use itertools::{Itertools, MinMaxResult};
use serde_json::Value;

use super::RankedProduct;

pub const TENSOR_SCORE_KEY: &str = "tensor_score";
pub const EMBEDDING_SCORE_KEY: &str = "embedding_score";
pub const COMBINED_SCORE_KEY: &str = "combined_score";

/// A search result paired with its score scaled into `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub product: RankedProduct,
    pub normalized: f64,
}

/// Min-max scale `scores` into `[0, 1]`. A set with no spread maps to all 1.0.
#[inline]
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    match scores.iter().copied().minmax() {
        MinMaxResult::NoElements => Vec::new(),
        MinMaxResult::OneElement(_) => vec![1.0],
        MinMaxResult::MinMax(min, max) => {
            let range = max - min;
            if range > 0.0 {
                scores.iter().map(|s| (s - min) / range).collect()
            } else {
                vec![1.0; scores.len()]
            }
        }
    }
}

/// Attach normalized scores to a result set
#[inline]
pub fn normalize(results: Vec<RankedProduct>) -> Vec<ScoredCandidate> {
    let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
    results
        .into_iter()
        .zip(min_max_normalize(&scores))
        .map(|(product, normalized)| ScoredCandidate {
            product,
            normalized,
        })
        .collect()
}

/// Descending by score; ties broken by id so output is stable across runs
#[inline]
pub fn sort_by_score(results: &mut [RankedProduct]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Number results 1..=n in their current order
#[inline]
pub fn assign_ranks(results: &mut [RankedProduct]) {
    for (index, result) in results.iter_mut().enumerate() {
        result.rank = index + 1;
    }
}

/// Keep only the highest-scoring result per id, then sort and re-rank
#[inline]
pub fn dedup_best_per_id(results: Vec<RankedProduct>) -> Vec<RankedProduct> {
    let mut best: HashMap<String, RankedProduct> = HashMap::with_capacity(results.len());

    for result in results {
        match best.entry(result.id.clone()) {
            Entry::Occupied(mut existing) => {
                if result.score.total_cmp(&existing.get().score) == Ordering::Greater {
                    existing.insert(result);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
        }
    }

    let mut deduped: Vec<RankedProduct> = best.into_values().collect();
    sort_by_score(&mut deduped);
    assign_ranks(&mut deduped);
    deduped
}

/// Weighted union of two normalized candidate sets, truncated to `top_k`
#[inline]
pub fn combine(
    tensor: Vec<ScoredCandidate>,
    embedding: Vec<ScoredCandidate>,
    tensor_weight: f64,
    top_k: usize,
) -> Vec<RankedProduct> {
    let embedding_weight = 1.0 - tensor_weight;
    let mut fused: Vec<RankedProduct> = Vec::with_capacity(tensor.len() + embedding.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(fused.capacity());

    for candidate in tensor {
        let raw = candidate.product.score;
        let contribution = candidate.normalized * tensor_weight;

        if let Some(&position) = positions.get(&candidate.product.id) {
            // Duplicate id within the tensor set: keep the stronger contribution
            let entry = &mut fused[position];
            if contribution > entry.score {
                entry.score = contribution;
                entry.metadata.insert(TENSOR_SCORE_KEY.to_string(), raw.into());
            }
            continue;
        }

        let mut product = candidate.product;
        product.score = contribution;
        product
            .metadata
            .insert(TENSOR_SCORE_KEY.to_string(), raw.into());
        positions.insert(product.id.clone(), fused.len());
        fused.push(product);
    }

    for candidate in embedding {
        let raw = candidate.product.score;
        let contribution = candidate.normalized * embedding_weight;

        match positions.get(&candidate.product.id) {
            Some(&position) => {
                let entry = &mut fused[position];
                if entry.metadata.contains_key(EMBEDDING_SCORE_KEY) {
                    continue;
                }
                entry.score += contribution;
                entry
                    .metadata
                    .insert(EMBEDDING_SCORE_KEY.to_string(), raw.into());
                for (key, value) in candidate.product.metadata {
                    entry.metadata.entry(key).or_insert(value);
                }
            }
            None => {
                let mut product = candidate.product;
                product.score = contribution;
                product
                    .metadata
                    .insert(EMBEDDING_SCORE_KEY.to_string(), raw.into());
                positions.insert(product.id.clone(), fused.len());
                fused.push(product);
            }
        }
    }

    for product in &mut fused {
        product
            .metadata
            .insert(COMBINED_SCORE_KEY.to_string(), Value::from(product.score));
    }

    sort_by_score(&mut fused);
    fused.truncate(top_k);
    assign_ranks(&mut fused);
    fused
}

/// Normalize both sets and combine them
#[inline]
pub fn fuse(
    tensor: Vec<RankedProduct>,
    embedding: Vec<RankedProduct>,
    tensor_weight: f64,
    top_k: usize,
) -> Vec<RankedProduct> {
    combine(normalize(tensor), normalize(embedding), tensor_weight, top_k)
}
