//! # Adaptive RAG
//!
//! Adaptive retrieval core for RAG pipelines.
//!
//! This crate provides:
//! - Query complexity analysis and classification
//! - Hybrid vector + sparse retrieval with rank fusion (RRF and friends)
//! - Automatic strategy selection with a transparent reasoning trail
//! - A top-level orchestrator with result caching and performance tracking
//! - A bounded Self-RAG loop that grades results and refines queries
//!
//! Backends (embedding, vector store, sparse retrieval, completion) are
//! trait objects; deterministic in-memory mocks ship with the crate so the
//! whole pipeline runs without external services.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use adaptive_rag::core::mock_providers::{MockEmbedder, MockSparseRetriever, MockVectorStore};
//! use adaptive_rag::{AdaptiveSearchOrchestrator, SearchOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> adaptive_rag::Result<()> {
//! let embedder = Arc::new(MockEmbedder::new(64));
//! let mut store = MockVectorStore::new(64);
//! let mut sparse = MockSparseRetriever::new();
//! store.index("c1", "d1", "tokio schedules async tasks", &embedder);
//! sparse.index("c1", "d1", "tokio schedules async tasks");
//!
//! let orchestrator =
//!     AdaptiveSearchOrchestrator::new(embedder, Arc::new(store), Arc::new(sparse));
//! let found = orchestrator
//!     .search("tokio tasks", &SearchOptions::default(), &CancellationToken::new())
//!     .await?;
//! assert!(!found.strategy_reasons.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// ================================
// MODULE DECLARATIONS
// ================================

/// Core traits, error types, and mock backends
pub mod core;
/// Query complexity analysis and classification
pub mod analysis;
/// Hybrid retrieval and rank fusion
pub mod retrieval;
/// Strategy selection and top-level orchestration
pub mod orchestrator;
/// Quality-driven Self-RAG refinement loop
pub mod selfrag;

// ================================
// PUBLIC API EXPORTS
// ================================

/// Prelude module containing the most commonly used types
pub mod prelude {
    pub use crate::core::{RagError, Result};
    pub use crate::orchestrator::{
        AdaptiveSearchOrchestrator, AdaptiveSearchResult, SearchOptions, SearchStrategy,
    };
    pub use crate::selfrag::{SelfRagLoop, SelfRagOptions, SelfRagResult};
}

// Re-export core types
pub use crate::core::{
    ContextExpander, EmbeddingProvider, ErrorSeverity, RagError, Reranker, Result, ScoredChunk,
    SemanticCache, SparseHit, SparseRetriever, TextCompletion, VectorStore,
};

// Re-export the analysis surface
pub use crate::analysis::{Complexity, Language, QueryAnalysis, QueryAnalyzer, QueryKind};

// Re-export retrieval types
pub use crate::retrieval::{
    fuse_ranked_lists, CandidateSource, FusionMethod, FusionWeights, HybridOptions,
    HybridSearchEngine, RankedCandidate,
};

// Re-export orchestration types
pub use crate::orchestrator::{
    next_in_rotation, AdaptiveSearchOrchestrator, AdaptiveSearchResult, PerformanceReport,
    SearchOptions, SearchPerformance, SearchStrategy, StrategySelector, StrategyStats,
};

// Re-export the Self-RAG surface
pub use crate::selfrag::{
    QualityAssessment, QualityAssessor, QualityIssue, QualityIssueKind, QueryRefiner,
    RefinementAction, RefinementKind, SearchIteration, SelfRagLoop, SelfRagOptions, SelfRagResult,
};
