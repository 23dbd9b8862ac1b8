//! Hybrid search engine combining vector and sparse retrieval
//!
//! Issues both backend searches concurrently, fuses the ranked lists, and
//! optionally reranks before truncation. Cancellation is raced against the
//! in-flight backend calls so a cancelled caller never waits on a slow
//! backend.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{EmbeddingProvider, RagError, Reranker, Result, SparseRetriever, VectorStore};
use crate::retrieval::{
    fusion::{fuse_ranked_lists, FusionMethod, FusionWeights},
    RankedCandidate,
};

/// Per-call options for hybrid search
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HybridOptions {
    /// Maximum results to return after fusion
    pub max_results: usize,
    /// Weight for the vector channel
    pub vector_weight: f32,
    /// Weight for the sparse channel
    pub sparse_weight: f32,
    /// Fusion method to combine the two ranked lists
    pub fusion_method: FusionMethod,
    /// RRF constant (higher values flatten rank contributions)
    pub rrf_k: f32,
    /// Candidates to request from each backend before fusion
    pub max_candidates: usize,
    /// Minimum similarity passed to the vector store
    pub min_vector_score: f32,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            vector_weight: 0.5,
            sparse_weight: 0.5,
            fusion_method: FusionMethod::Rrf,
            rrf_k: 60.0,
            max_candidates: 50,
            min_vector_score: 0.0,
        }
    }
}

/// Hybrid search engine over pluggable vector and sparse backends
pub struct HybridSearchEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    sparse_retriever: Arc<dyn SparseRetriever>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridSearchEngine {
    /// Create a new hybrid engine over the given backends
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        sparse_retriever: Arc<dyn SparseRetriever>,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            sparse_retriever,
            reranker: None,
        }
    }

    /// Attach a post-fusion reranker, invoked before final truncation
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Perform a hybrid search for `query`
    ///
    /// An empty or whitespace-only query short-circuits to an empty result
    /// set without touching either backend.
    pub async fn search(
        &self,
        query: &str,
        options: &HybridOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedCandidate>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled {
                operation: "hybrid_search".to_string(),
            });
        }

        // Fan out: the vector path (embed, then store search) and the
        // sparse path run concurrently and join before fusion.
        let vector_path = async {
            let embedding = self.embedder.embed(query).await?;
            self.vector_store
                .search(&embedding, options.max_candidates, options.min_vector_score)
                .await
        };
        let sparse_path = self.sparse_retriever.search(query, options.max_candidates);

        let (vector_results, sparse_results) = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RagError::Cancelled {
                    operation: "hybrid_search".to_string(),
                });
            },
            joined = async { tokio::join!(vector_path, sparse_path) } => {
                let (vector, sparse) = joined;
                (vector?, sparse?)
            },
        };

        tracing::debug!(
            vector_count = vector_results.len(),
            sparse_count = sparse_results.len(),
            method = ?options.fusion_method,
            "Fusing hybrid candidate lists"
        );

        let weights = FusionWeights {
            vector: options.vector_weight,
            sparse: options.sparse_weight,
        };
        let mut fused = fuse_ranked_lists(
            &vector_results,
            &sparse_results,
            options.fusion_method,
            weights,
            options.rrf_k,
        );

        if let Some(reranker) = &self.reranker {
            fused = reranker
                .rerank(query, fused, options.max_results)
                .await?;
            for (idx, candidate) in fused.iter_mut().enumerate() {
                candidate.fused_rank = idx + 1;
            }
        }

        // Truncation happens only after fusion (and reranking): per-source
        // truncation would bias against candidates that rank moderately in
        // each source but consistently in both.
        fused.truncate(options.max_results);
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_providers::{
        MockEmbedder, MockReranker, MockSparseRetriever, MockVectorStore,
    };

    fn engine_with_corpus() -> HybridSearchEngine {
        let embedder = Arc::new(MockEmbedder::new(32));
        let mut store = MockVectorStore::new(32);
        let mut sparse = MockSparseRetriever::new();
        for (id, content) in [
            ("c1", "rust async runtime internals"),
            ("c2", "tokio task scheduling"),
            ("c3", "garden vegetable recipes"),
        ] {
            store.index(id, "doc", content, &MockEmbedder::new(32));
            sparse.index(id, "doc", content);
        }
        HybridSearchEngine::new(embedder, Arc::new(store), Arc::new(sparse))
    }

    #[tokio::test]
    async fn empty_query_short_circuits_without_backends() {
        let engine = engine_with_corpus();
        let results = engine
            .search("   ", &HybridOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_is_deterministic() {
        let engine = engine_with_corpus();
        let options = HybridOptions::default();
        let cancel = CancellationToken::new();
        let first = engine.search("rust async runtime", &options, &cancel).await.unwrap();
        let second = engine.search("rust async runtime", &options, &cancel).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_backends() {
        let engine = engine_with_corpus();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .search("rust", &HybridOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn reranker_reorders_the_full_fused_list_before_truncation() {
        let cancel = CancellationToken::new();
        let baseline = engine_with_corpus()
            .search("rust async tokio", &HybridOptions::default(), &cancel)
            .await
            .unwrap();
        assert!(baseline.len() > 1);

        // The reversing reranker promotes the weakest fused candidate; with
        // max_results 1 that candidate would have been dropped if truncation
        // ran first.
        let reranked = engine_with_corpus()
            .with_reranker(Arc::new(MockReranker::new()))
            .search(
                "rust async tokio",
                &HybridOptions {
                    max_results: 1,
                    ..Default::default()
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(reranked.len(), 1);
        assert_eq!(
            reranked[0].chunk_id,
            baseline.last().map(|c| c.chunk_id.clone()).unwrap()
        );
        assert_eq!(reranked[0].fused_rank, 1);
    }

    #[tokio::test]
    async fn truncates_after_fusion() {
        let engine = engine_with_corpus();
        let options = HybridOptions {
            max_results: 1,
            ..Default::default()
        };
        let results = engine
            .search("rust async", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].fused_rank, 1);
    }
}
