//! Collaborator traits consumed by the search core
//!
//! The core never talks to a model provider, an index, or a cache store
//! directly; every external dependency sits behind one of these async
//! abstractions so implementations can be swapped for testing or for
//! different deployments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::Result;
use crate::retrieval::RankedCandidate;

/// A chunk returned by the vector store with its similarity score
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScoredChunk {
    /// Stable chunk identifier
    pub chunk_id: String,
    /// Identifier of the document the chunk belongs to
    pub document_id: String,
    /// Text content of the chunk
    pub content: String,
    /// Similarity score assigned by the store
    pub score: f32,
    /// Optional per-chunk metadata (credibility, freshness, source)
    pub metadata: HashMap<String, String>,
}

/// A hit returned by the sparse (keyword) retriever
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SparseHit {
    /// Stable chunk identifier
    pub chunk_id: String,
    /// Identifier of the document the chunk belongs to
    pub document_id: String,
    /// Text content of the chunk
    pub content: String,
    /// Keyword-ranking score (BM25-style, not comparable to vector scores)
    pub score: f32,
    /// Query terms that matched this chunk
    pub matched_terms: Vec<String>,
    /// Per-term frequencies inside the chunk
    pub term_frequencies: HashMap<String, usize>,
    /// Optional per-chunk metadata
    pub metadata: HashMap<String, String>,
}

/// Text embedding abstraction for converting queries to vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the dimensionality of embeddings produced by this provider
    fn dimension(&self) -> usize;
}

/// Embedding-similarity search backend
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Search for the `top_k` chunks most similar to `vector`, dropping
    /// anything below `min_score`
    async fn search(&self, vector: &[f32], top_k: usize, min_score: f32)
        -> Result<Vec<ScoredChunk>>;
}

/// Keyword (BM25-style) search backend
#[async_trait]
pub trait SparseRetriever: Send + Sync {
    /// Search the keyword index for `query`, returning up to `top_k` hits
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SparseHit>>;
}

/// Optional embedding-similarity cache consulted by the orchestrator
///
/// Similarity between the incoming query and cached queries is cosine
/// distance between their embeddings; the implementation owns that
/// comparison.
#[async_trait]
pub trait SemanticCache: Send + Sync {
    /// Look up a cached result set for a query semantically close to
    /// `query` (within `similarity_threshold`)
    async fn get(
        &self,
        query: &str,
        similarity_threshold: f32,
    ) -> Result<Option<Vec<RankedCandidate>>>;

    /// Store a result set for later similarity-matched retrieval
    async fn set(&self, query: &str, results: &[RankedCandidate], ttl: Duration) -> Result<()>;
}

/// Optional text-completion collaborator
///
/// Consumed by HyDE/StepBack query rewriting and the refinement loop's
/// advanced rewrite path. Absence degrades gracefully to heuristics.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Complete a prompt into free text
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Optional post-fusion reranker, invoked before final truncation
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `candidates` against `query`, returning at most `top_k`
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RankedCandidate>,
        top_k: usize,
    ) -> Result<Vec<RankedCandidate>>;
}

/// Optional small-to-big context expansion collaborator
///
/// The TwoStage strategy passes first-pass survivors through this interface
/// so precisely-matched small chunks come back widened with surrounding
/// context.
#[async_trait]
pub trait ContextExpander: Send + Sync {
    /// Expand each candidate with surrounding context chunks
    async fn expand(&self, candidates: Vec<RankedCandidate>) -> Result<Vec<RankedCandidate>>;
}
