//! Core error handling, collaborator traits, and test doubles

pub mod error;
pub mod mock_providers;
pub mod traits;

pub use error::{ErrorSeverity, RagError, Result};
pub use traits::{
    ContextExpander, EmbeddingProvider, Reranker, ScoredChunk, SemanticCache, SparseHit,
    SparseRetriever, TextCompletion, VectorStore,
};
