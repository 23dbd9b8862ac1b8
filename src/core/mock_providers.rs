//! Deterministic in-memory collaborators for tests and examples
//!
//! These mocks implement the collaborator traits without I/O so pipeline
//! behavior can be asserted exactly: the embedder is a hashed bag-of-words
//! (similar texts produce similar vectors), the vector store does exact
//! cosine search, and the sparse retriever scores by term overlap.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{
    ContextExpander, EmbeddingProvider, Reranker, Result, ScoredChunk, SemanticCache, SparseHit,
    SparseRetriever, TextCompletion, VectorStore,
};
use crate::retrieval::RankedCandidate;

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Deterministic hashed bag-of-words embedder
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Create an embedder producing vectors of the given dimensionality
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Synchronous embedding used by the in-memory indexers
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(&token) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// In-memory exact cosine-similarity vector store
#[derive(Debug, Default)]
pub struct MockVectorStore {
    dimension: usize,
    entries: Vec<(String, String, String, Vec<f32>, HashMap<String, String>)>,
}

impl MockVectorStore {
    /// Create an empty store for vectors of the given dimensionality
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    /// Index a chunk using the mock embedder
    pub fn index(&mut self, chunk_id: &str, document_id: &str, content: &str, embedder: &MockEmbedder) {
        self.index_with_metadata(chunk_id, document_id, content, embedder, HashMap::new());
    }

    /// Index a chunk with explicit metadata
    pub fn index_with_metadata(
        &mut self,
        chunk_id: &str,
        document_id: &str,
        content: &str,
        embedder: &MockEmbedder,
        metadata: HashMap<String, String>,
    ) {
        debug_assert_eq!(embedder.dimension(), self.dimension);
        self.entries.push((
            chunk_id.to_string(),
            document_id.to_string(),
            content.to_string(),
            embedder.vector_for(content),
            metadata,
        ));
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na > 0.0 && nb > 0.0 {
        dot / (na * nb)
    } else {
        0.0
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|(chunk_id, document_id, content, embedding, metadata)| ScoredChunk {
                chunk_id: chunk_id.clone(),
                document_id: document_id.clone(),
                content: content.clone(),
                score: cosine(vector, embedding),
                metadata: metadata.clone(),
            })
            .filter(|c| c.score >= min_score)
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// In-memory term-overlap sparse retriever
#[derive(Debug, Default)]
pub struct MockSparseRetriever {
    documents: Vec<(String, String, String, HashMap<String, usize>)>,
}

impl MockSparseRetriever {
    /// Create an empty keyword index
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a chunk's content for keyword search
    pub fn index(&mut self, chunk_id: &str, document_id: &str, content: &str) {
        let mut frequencies: HashMap<String, usize> = HashMap::new();
        for token in tokenize(content) {
            *frequencies.entry(token).or_insert(0) += 1;
        }
        self.documents.push((
            chunk_id.to_string(),
            document_id.to_string(),
            content.to_string(),
            frequencies,
        ));
    }
}

#[async_trait]
impl SparseRetriever for MockSparseRetriever {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SparseHit>> {
        let query_terms = tokenize(query);
        let mut hits: Vec<SparseHit> = self
            .documents
            .iter()
            .filter_map(|(chunk_id, document_id, content, frequencies)| {
                let matched: Vec<String> = query_terms
                    .iter()
                    .filter(|t| frequencies.contains_key(*t))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                let score: usize = matched.iter().map(|t| frequencies[t]).sum();
                Some(SparseHit {
                    chunk_id: chunk_id.clone(),
                    document_id: document_id.clone(),
                    content: content.clone(),
                    score: score as f32,
                    matched_terms: matched.clone(),
                    term_frequencies: matched
                        .iter()
                        .map(|t| (t.clone(), frequencies[t]))
                        .collect(),
                    metadata: HashMap::new(),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Canned text-completion collaborator
///
/// Returns the configured response for every prompt, or echoes a
/// deterministic transformation of the prompt when none is set.
#[derive(Debug, Default)]
pub struct MockTextCompletion {
    response: Option<String>,
}

impl MockTextCompletion {
    /// Completion that echoes a deterministic digest of the prompt
    pub fn new() -> Self {
        Self::default()
    }

    /// Completion that always returns `response`
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
        }
    }
}

#[async_trait]
impl TextCompletion for MockTextCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Ok(tokenize(prompt).join(" ")),
        }
    }
}

/// In-memory semantic cache keyed by exact query text
///
/// Real implementations compare query embeddings; the mock treats exact
/// text equality as similarity 1.0 and everything else as a miss, which is
/// enough to exercise the orchestrator's consult/store path.
#[derive(Debug, Default)]
pub struct MockSemanticCache {
    entries: RwLock<HashMap<String, Vec<RankedCandidate>>>,
}

impl MockSemanticCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SemanticCache for MockSemanticCache {
    async fn get(
        &self,
        query: &str,
        _similarity_threshold: f32,
    ) -> Result<Option<Vec<RankedCandidate>>> {
        Ok(self.entries.read().get(query).cloned())
    }

    async fn set(&self, query: &str, results: &[RankedCandidate], _ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .insert(query.to_string(), results.to_vec());
        Ok(())
    }
}

/// Reranker that reverses the fused order
///
/// Deliberately disagrees with fusion so reranking is observable in tests:
/// the weakest fused candidate comes back first.
#[derive(Debug, Default)]
pub struct MockReranker;

impl MockReranker {
    /// Create the reversing reranker
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Reranker for MockReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<RankedCandidate>,
        top_k: usize,
    ) -> Result<Vec<RankedCandidate>> {
        candidates.reverse();
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

/// Context expander backed by full document texts
///
/// Small-to-big expansion stand-in: candidates whose document is registered
/// come back with the whole document as content, others pass through
/// untouched.
#[derive(Debug, Default)]
pub struct MockContextExpander {
    documents: HashMap<String, String>,
}

impl MockContextExpander {
    /// Create an expander with no registered documents
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the full text for a document id
    pub fn with_document(mut self, document_id: &str, text: &str) -> Self {
        self.documents
            .insert(document_id.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl ContextExpander for MockContextExpander {
    async fn expand(
        &self,
        mut candidates: Vec<RankedCandidate>,
    ) -> Result<Vec<RankedCandidate>> {
        for candidate in &mut candidates {
            if let Some(text) = self.documents.get(&candidate.document_id) {
                candidate.content = text.clone();
            }
        }
        Ok(candidates)
    }
}

/// Vector store that always fails
///
/// Exists for error-path tests: backend failures must surface unchanged
/// instead of being retried or masked.
#[derive(Debug, Default)]
pub struct FailingVectorStore;

#[async_trait]
impl VectorStore for FailingVectorStore {
    async fn search(
        &self,
        _vector: &[f32],
        _top_k: usize,
        _min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        Err(crate::backend_error!("vector-store", "simulated outage"))
    }
}
