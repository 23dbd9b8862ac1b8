//! Rank fusion for hybrid retrieval
//!
//! Combines the vector and sparse ranked lists into a single ordering.
//! Reciprocal Rank Fusion is the default because it is rank-based and
//! insensitive to the incomparable score scales of cosine similarity and
//! BM25; the score-based alternatives normalize per source before mixing.

use std::collections::HashMap;

use crate::core::{ScoredChunk, SparseHit};
use crate::retrieval::{CandidateSource, RankedCandidate};

/// Method used to combine the two ranked lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FusionMethod {
    /// Reciprocal Rank Fusion (default)
    Rrf,
    /// Weighted sum of max-normalized scores
    WeightedSum,
    /// Product of weighted normalized scores over present sources
    Product,
    /// Maximum of weighted normalized scores
    Max,
    /// Harmonic mean of weighted normalized scores
    HarmonicMean,
}

impl Default for FusionMethod {
    fn default() -> Self {
        FusionMethod::Rrf
    }
}

/// Per-source fusion weights
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FusionWeights {
    /// Weight for the vector channel
    pub vector: f32,
    /// Weight for the sparse channel
    pub sparse: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.5,
            sparse: 0.5,
        }
    }
}

impl FusionWeights {
    /// Normalize the weights to sum to 1.0
    ///
    /// A non-positive sum falls back to the balanced default rather than
    /// producing NaN contributions.
    pub fn normalized(self) -> Self {
        let sum = self.vector + self.sparse;
        if !sum.is_finite() || sum <= 0.0 {
            return Self::default();
        }
        Self {
            vector: self.vector / sum,
            sparse: self.sparse / sum,
        }
    }
}

/// Fuse the vector and sparse ranked lists into one ordered candidate list
///
/// The output covers every candidate from either source (no truncation
/// here; callers truncate only after fusion and any reranking). Fused rank
/// is a total order by descending fused score; ties break by first
/// appearance in the vector list, then the sparse list.
pub fn fuse_ranked_lists(
    vector_results: &[ScoredChunk],
    sparse_results: &[SparseHit],
    method: FusionMethod,
    weights: FusionWeights,
    rrf_k: f32,
) -> Vec<RankedCandidate> {
    let weights = weights.normalized();

    // Appearance-ordered accumulation: vector list first, then sparse.
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, RankedCandidate> = HashMap::new();

    for (idx, chunk) in vector_results.iter().enumerate() {
        let entry = by_id
            .entry(chunk.chunk_id.clone())
            .or_insert_with(|| {
                order.push(chunk.chunk_id.clone());
                RankedCandidate {
                    chunk_id: chunk.chunk_id.clone(),
                    document_id: chunk.document_id.clone(),
                    content: chunk.content.clone(),
                    vector_score: None,
                    sparse_score: None,
                    vector_rank: None,
                    sparse_rank: None,
                    fused_score: 0.0,
                    fused_rank: 0,
                    matched_terms: Vec::new(),
                    source: CandidateSource::Vector,
                    metadata: chunk.metadata.clone(),
                }
            });
        entry.vector_score = Some(chunk.score);
        entry.vector_rank = Some(idx + 1);
    }

    for (idx, hit) in sparse_results.iter().enumerate() {
        let entry = by_id.entry(hit.chunk_id.clone()).or_insert_with(|| {
            order.push(hit.chunk_id.clone());
            RankedCandidate {
                chunk_id: hit.chunk_id.clone(),
                document_id: hit.document_id.clone(),
                content: hit.content.clone(),
                vector_score: None,
                sparse_score: None,
                vector_rank: None,
                sparse_rank: None,
                fused_score: 0.0,
                fused_rank: 0,
                matched_terms: Vec::new(),
                source: CandidateSource::Sparse,
                metadata: hit.metadata.clone(),
            }
        });
        entry.sparse_score = Some(hit.score);
        entry.sparse_rank = Some(idx + 1);
        entry.matched_terms = hit.matched_terms.clone();
        if entry.vector_rank.is_some() {
            entry.source = CandidateSource::Both;
        }
    }

    // Max-normalization factors for the score-based methods.
    let vector_max = vector_results
        .iter()
        .map(|c| c.score)
        .fold(0.0_f32, f32::max);
    let sparse_max = sparse_results
        .iter()
        .map(|h| h.score)
        .fold(0.0_f32, f32::max);

    for candidate in by_id.values_mut() {
        candidate.fused_score =
            fused_score(candidate, method, weights, rrf_k, vector_max, sparse_max);
    }

    // Stable sort keeps first-appearance order for equal fused scores.
    let mut fused: Vec<RankedCandidate> = order
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (idx, candidate) in fused.iter_mut().enumerate() {
        candidate.fused_rank = idx + 1;
    }
    fused
}

fn fused_score(
    candidate: &RankedCandidate,
    method: FusionMethod,
    weights: FusionWeights,
    rrf_k: f32,
    vector_max: f32,
    sparse_max: f32,
) -> f32 {
    match method {
        FusionMethod::Rrf => {
            let mut score = 0.0;
            if let Some(rank) = candidate.vector_rank {
                score += weights.vector / (rrf_k + rank as f32);
            }
            if let Some(rank) = candidate.sparse_rank {
                score += weights.sparse / (rrf_k + rank as f32);
            }
            score
        },
        FusionMethod::WeightedSum => {
            weighted_norm(candidate.vector_score, vector_max, weights.vector)
                + weighted_norm(candidate.sparse_score, sparse_max, weights.sparse)
        },
        FusionMethod::Product => {
            // Absent sources are skipped entirely so single-source
            // candidates are not zeroed out.
            let mut score = 1.0;
            let mut present = false;
            if candidate.vector_score.is_some() {
                score *= weighted_norm(candidate.vector_score, vector_max, weights.vector);
                present = true;
            }
            if candidate.sparse_score.is_some() {
                score *= weighted_norm(candidate.sparse_score, sparse_max, weights.sparse);
                present = true;
            }
            if present {
                score
            } else {
                0.0
            }
        },
        FusionMethod::Max => weighted_norm(candidate.vector_score, vector_max, weights.vector)
            .max(weighted_norm(candidate.sparse_score, sparse_max, weights.sparse)),
        FusionMethod::HarmonicMean => {
            let v = weighted_norm(candidate.vector_score, vector_max, weights.vector);
            let s = weighted_norm(candidate.sparse_score, sparse_max, weights.sparse);
            match (candidate.vector_score, candidate.sparse_score) {
                (Some(_), Some(_)) if v + s > 0.0 => 2.0 * v * s / (v + s),
                (Some(_), None) => v,
                (None, Some(_)) => s,
                _ => 0.0,
            }
        },
    }
}

fn weighted_norm(score: Option<f32>, max: f32, weight: f32) -> f32 {
    match score {
        Some(s) if max > 0.0 => (s / max) * weight,
        Some(s) => s.max(0.0) * weight,
        None => 0.0,
    }
}
