//! Retrieval types and the hybrid search engine
//!
//! This module owns the shared candidate representation plus the fusion
//! mathematics and the concurrent hybrid engine built on top of it.

pub mod fusion;
pub mod hybrid;

use std::collections::HashMap;

pub use fusion::{fuse_ranked_lists, FusionMethod, FusionWeights};
pub use hybrid::{HybridOptions, HybridSearchEngine};

/// Which retrieval channel produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CandidateSource {
    /// Embedding/vector-similarity retrieval only
    Vector,
    /// Keyword/statistical retrieval only
    Sparse,
    /// Both channels returned this candidate
    Both,
}

/// A retrieved chunk with full fusion provenance
///
/// Per-source scores and ranks are `None` when that source did not return
/// the candidate; absence from a source contributes zero to the fused
/// score, never a penalty.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RankedCandidate {
    /// Stable chunk identifier
    pub chunk_id: String,
    /// Identifier of the document the chunk belongs to
    pub document_id: String,
    /// Text content of the chunk
    pub content: String,
    /// Raw similarity score from the vector store, if that source
    /// returned this candidate
    pub vector_score: Option<f32>,
    /// Raw keyword score from the sparse retriever, if that source
    /// returned this candidate
    pub sparse_score: Option<f32>,
    /// 1-based position in the vector result list
    pub vector_rank: Option<usize>,
    /// 1-based position in the sparse result list
    pub sparse_rank: Option<usize>,
    /// Final fused score used for ordering
    pub fused_score: f32,
    /// 1-based position after fusion (total order by fused score, ties
    /// broken by first appearance in the vector list, then the sparse list)
    pub fused_rank: usize,
    /// Query terms the sparse retriever matched in this chunk
    pub matched_terms: Vec<String>,
    /// Which channel(s) produced this candidate
    pub source: CandidateSource,
    /// Optional per-chunk metadata carried through from the backend
    pub metadata: HashMap<String, String>,
}

impl RankedCandidate {
    /// Read an optional metadata field as a score in [0, 1]
    ///
    /// Returns `None` when the field is absent or does not parse.
    pub fn metadata_score(&self, key: &str) -> Option<f32> {
        self.metadata
            .get(key)
            .and_then(|v| v.parse::<f32>().ok())
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0))
    }
}
