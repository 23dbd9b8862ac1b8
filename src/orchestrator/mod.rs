//! Adaptive search orchestration
//!
//! The orchestrator is the top-level entry point for a single search: it
//! validates input, consults the result cache, classifies the query,
//! selects a strategy, dispatches to the matching execution path, and
//! records performance for future tuning.

pub mod performance;
pub mod strategy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::analysis::{QueryAnalysis, QueryAnalyzer};
use crate::core::{
    ContextExpander, EmbeddingProvider, RagError, Reranker, Result, ScoredChunk, SemanticCache,
    SparseHit, SparseRetriever, TextCompletion, VectorStore,
};
use crate::retrieval::{
    CandidateSource, FusionMethod, HybridOptions, HybridSearchEngine, RankedCandidate,
};

pub use performance::{PerformanceLedger, PerformanceReport, PerformanceSample, StrategyStats};
pub use strategy::{next_in_rotation, SearchStrategy, StrategySelector};

/// Immutable per-call search options
///
/// Stages never mutate a shared options object; anything needing adjusted
/// options for a sub-call builds a fresh struct.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchOptions {
    /// Maximum results to return
    pub max_results: usize,
    /// Skip strategy selection and use this strategy
    pub force_strategy: Option<SearchStrategy>,
    /// Consult and populate the orchestrator's result cache
    pub use_cache: bool,
    /// Time-to-live for cached results
    pub cache_ttl: Duration,
    /// Weight for the vector channel during fusion
    pub vector_weight: f32,
    /// Weight for the sparse channel during fusion
    pub sparse_weight: f32,
    /// Fusion method for hybrid execution
    pub fusion_method: FusionMethod,
    /// RRF constant
    pub rrf_k: f32,
    /// Candidates requested from each backend before fusion
    pub max_candidates: usize,
    /// Minimum similarity passed to the vector store
    pub min_vector_score: f32,
    /// Similarity threshold for the optional semantic cache
    pub semantic_cache_threshold: f32,
    /// Bounded parallelism for MultiQuery paraphrase fan-out
    pub multi_query_parallelism: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            force_strategy: None,
            use_cache: true,
            cache_ttl: Duration::from_secs(300),
            vector_weight: 0.5,
            sparse_weight: 0.5,
            fusion_method: FusionMethod::Rrf,
            rrf_k: 60.0,
            max_candidates: 50,
            min_vector_score: 0.0,
            semantic_cache_threshold: 0.92,
            multi_query_parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl SearchOptions {
    fn hybrid_options(&self) -> HybridOptions {
        HybridOptions {
            max_results: self.max_results,
            vector_weight: self.vector_weight,
            sparse_weight: self.sparse_weight,
            fusion_method: self.fusion_method,
            rrf_k: self.rrf_k,
            max_candidates: self.max_candidates,
            min_vector_score: self.min_vector_score,
        }
    }
}

/// Timing and cache provenance for one orchestrator invocation
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchPerformance {
    /// Wall-clock time for the call
    pub elapsed: Duration,
    /// Whether the payload was served from the result cache
    pub cache_hit: bool,
}

/// Output of one orchestrator invocation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdaptiveSearchResult {
    /// Final ordered results
    pub results: Vec<RankedCandidate>,
    /// Strategy that produced the results
    pub used_strategy: SearchStrategy,
    /// The analysis that drove strategy selection
    pub analysis: QueryAnalysis,
    /// Human-readable reasons for the strategy choice (never empty)
    pub strategy_reasons: Vec<String>,
    /// Timing and cache provenance
    pub performance: SearchPerformance,
}

struct CacheSlot {
    results: Vec<RankedCandidate>,
    used_strategy: SearchStrategy,
    analysis: QueryAnalysis,
    strategy_reasons: Vec<String>,
    expires_at: Instant,
}

/// Top-level adaptive search orchestrator
///
/// Owns the only cross-call state in the core: the exact-text result cache
/// and the strategy performance ledger. Concurrent callers with different
/// queries use independent cache slots; identical concurrent queries may
/// compute redundantly (no single-flight guarantee, by design).
pub struct AdaptiveSearchOrchestrator {
    analyzer: QueryAnalyzer,
    selector: StrategySelector,
    engine: HybridSearchEngine,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    sparse_retriever: Arc<dyn SparseRetriever>,
    context_expander: Option<Arc<dyn ContextExpander>>,
    completion: Option<Arc<dyn TextCompletion>>,
    semantic_cache: Option<Arc<dyn SemanticCache>>,
    result_cache: RwLock<HashMap<String, CacheSlot>>,
    ledger: PerformanceLedger,
}

impl AdaptiveSearchOrchestrator {
    /// Create an orchestrator over the given backends
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        sparse_retriever: Arc<dyn SparseRetriever>,
    ) -> Self {
        Self {
            analyzer: QueryAnalyzer::new(),
            selector: StrategySelector,
            engine: HybridSearchEngine::new(
                Arc::clone(&embedder),
                Arc::clone(&vector_store),
                Arc::clone(&sparse_retriever),
            ),
            embedder,
            vector_store,
            sparse_retriever,
            context_expander: None,
            completion: None,
            semantic_cache: None,
            result_cache: RwLock::new(HashMap::new()),
            ledger: PerformanceLedger::new(),
        }
    }

    /// Attach a post-fusion reranker to the hybrid engine
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.engine = self.engine.with_reranker(reranker);
        self
    }

    /// Attach a small-to-big context expander for the TwoStage strategy
    pub fn with_context_expander(mut self, expander: Arc<dyn ContextExpander>) -> Self {
        self.context_expander = Some(expander);
        self
    }

    /// Attach a text-completion collaborator for HyDE/StepBack rewrites
    pub fn with_text_completion(mut self, completion: Arc<dyn TextCompletion>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Attach an embedding-similarity cache
    pub fn with_semantic_cache(mut self, cache: Arc<dyn SemanticCache>) -> Self {
        self.semantic_cache = Some(cache);
        self
    }

    /// Run one adaptive search
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<AdaptiveSearchResult> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput {
                message: "query must not be empty".to_string(),
            });
        }
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled {
                operation: "adaptive_search".to_string(),
            });
        }

        let started = Instant::now();

        if options.use_cache {
            if let Some(hit) = self.cache_lookup(query) {
                tracing::debug!(query, "Result cache hit");
                return Ok(AdaptiveSearchResult {
                    performance: SearchPerformance {
                        elapsed: started.elapsed(),
                        cache_hit: true,
                    },
                    ..hit
                });
            }
        }

        let analysis = self.analyzer.analyze(query);
        let (used_strategy, mut strategy_reasons) =
            self.selector
                .select(&analysis, options.max_results, options.force_strategy);

        if options.use_cache {
            if let Some(cache) = &self.semantic_cache {
                if let Some(results) = cache
                    .get(query, options.semantic_cache_threshold)
                    .await?
                {
                    tracing::debug!(query, "Semantic cache hit");
                    strategy_reasons.push("Served from semantic cache".to_string());
                    return Ok(AdaptiveSearchResult {
                        results,
                        used_strategy,
                        analysis,
                        strategy_reasons,
                        performance: SearchPerformance {
                            elapsed: started.elapsed(),
                            cache_hit: true,
                        },
                    });
                }
            }
        }

        tracing::info!(
            query,
            strategy = %used_strategy,
            complexity = ?analysis.complexity,
            "Dispatching search strategy"
        );

        let results = match used_strategy {
            SearchStrategy::DirectVector => self.direct_vector(query, options, cancel).await?,
            SearchStrategy::KeywordOnly => self.keyword_only(query, options, cancel).await?,
            SearchStrategy::Hybrid => {
                self.engine
                    .search(query, &options.hybrid_options(), cancel)
                    .await?
            },
            SearchStrategy::TwoStage => {
                self.two_stage(query, options, cancel, &mut strategy_reasons)
                    .await?
            },
            SearchStrategy::MultiQuery => {
                self.multi_query(query, &analysis, options, cancel).await?
            },
            SearchStrategy::Hyde => {
                let rewritten = self.hyde_rewrite(query, &analysis).await;
                strategy_reasons.push(format!("HyDE rewrite: \"{rewritten}\""));
                self.engine
                    .search(&rewritten, &options.hybrid_options(), cancel)
                    .await?
            },
            SearchStrategy::StepBack => {
                let rewritten = self.step_back_rewrite(query, &analysis).await;
                strategy_reasons.push(format!("Step-back rewrite: \"{rewritten}\""));
                self.engine
                    .search(&rewritten, &options.hybrid_options(), cancel)
                    .await?
            },
        };

        let elapsed = started.elapsed();
        self.ledger.record(used_strategy, elapsed, results.len());

        if options.use_cache {
            self.cache_store(
                query,
                &results,
                used_strategy,
                &analysis,
                &strategy_reasons,
                options.cache_ttl,
            );
            if let Some(cache) = &self.semantic_cache {
                cache.set(query, &results, options.cache_ttl).await?;
            }
        }

        Ok(AdaptiveSearchResult {
            results,
            used_strategy,
            analysis,
            strategy_reasons,
            performance: SearchPerformance {
                elapsed,
                cache_hit: false,
            },
        })
    }

    /// Aggregate performance report over every strategy executed so far
    pub fn performance_report(&self) -> PerformanceReport {
        self.ledger.report()
    }

    // --- caching ---

    fn cache_lookup(&self, query: &str) -> Option<AdaptiveSearchResult> {
        let cache = self.result_cache.read();
        let slot = cache.get(query)?;
        if slot.expires_at <= Instant::now() {
            return None;
        }
        Some(AdaptiveSearchResult {
            results: slot.results.clone(),
            used_strategy: slot.used_strategy,
            analysis: slot.analysis.clone(),
            strategy_reasons: slot.strategy_reasons.clone(),
            performance: SearchPerformance {
                elapsed: Duration::ZERO,
                cache_hit: true,
            },
        })
    }

    fn cache_store(
        &self,
        query: &str,
        results: &[RankedCandidate],
        used_strategy: SearchStrategy,
        analysis: &QueryAnalysis,
        strategy_reasons: &[String],
        ttl: Duration,
    ) {
        let slot = CacheSlot {
            results: results.to_vec(),
            used_strategy,
            analysis: analysis.clone(),
            strategy_reasons: strategy_reasons.to_vec(),
            expires_at: Instant::now() + ttl,
        };
        self.result_cache.write().insert(query.to_string(), slot);
    }

    // --- strategy execution paths ---

    async fn direct_vector(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedCandidate>> {
        let chunks = with_cancellation("direct_vector", cancel, async {
            let embedding = self.embedder.embed(query).await?;
            self.vector_store
                .search(&embedding, options.max_results, options.min_vector_score)
                .await
        })
        .await?;
        Ok(candidates_from_vector(&chunks))
    }

    async fn keyword_only(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedCandidate>> {
        let hits = with_cancellation(
            "keyword_only",
            cancel,
            self.sparse_retriever.search(query, options.max_results),
        )
        .await?;
        Ok(candidates_from_sparse(&hits))
    }

    async fn two_stage(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
        reasons: &mut Vec<String>,
    ) -> Result<Vec<RankedCandidate>> {
        // First pass over-fetches so expansion has survivors to widen.
        let first_pass = HybridOptions {
            max_results: (options.max_results * 2).min(options.max_candidates),
            ..options.hybrid_options()
        };
        let survivors = self.engine.search(query, &first_pass, cancel).await?;

        let mut results = match &self.context_expander {
            Some(expander) => {
                with_cancellation("context_expansion", cancel, expander.expand(survivors)).await?
            },
            None => {
                tracing::debug!("No context expander configured; two-stage degrades to one pass");
                reasons.push(
                    "Context expander unavailable; returning first-pass results".to_string(),
                );
                survivors
            },
        };
        results.truncate(options.max_results);
        for (idx, candidate) in results.iter_mut().enumerate() {
            candidate.fused_rank = idx + 1;
        }
        Ok(results)
    }

    async fn multi_query(
        &self,
        query: &str,
        analysis: &QueryAnalysis,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedCandidate>> {
        let paraphrases = paraphrases_for(query, analysis);
        tracing::debug!(count = paraphrases.len(), "MultiQuery paraphrase fan-out");

        let semaphore = Arc::new(Semaphore::new(options.multi_query_parallelism.max(1)));
        let sub_options = HybridOptions {
            max_results: options.max_candidates,
            ..options.hybrid_options()
        };

        let searches = paraphrases.iter().map(|paraphrase| {
            let semaphore = Arc::clone(&semaphore);
            let sub_options = sub_options.clone();
            async move {
                let _permit = semaphore.acquire().await.map_err(|_| RagError::Cancelled {
                    operation: "multi_query".to_string(),
                })?;
                self.engine.search(paraphrase, &sub_options, cancel).await
            }
        });
        let result_lists = futures::future::join_all(searches).await;

        // Merge by best fused score per chunk; candidates seen by several
        // paraphrases keep their strongest showing.
        let mut merged: HashMap<String, RankedCandidate> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for list in result_lists {
            for candidate in list? {
                match merged.get_mut(&candidate.chunk_id) {
                    Some(existing) if existing.fused_score >= candidate.fused_score => {},
                    Some(existing) => *existing = candidate,
                    None => {
                        order.push(candidate.chunk_id.clone());
                        merged.insert(candidate.chunk_id.clone(), candidate);
                    },
                }
            }
        }

        let mut results: Vec<RankedCandidate> = order
            .iter()
            .filter_map(|id| merged.remove(id))
            .collect();
        results.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(options.max_results);
        for (idx, candidate) in results.iter_mut().enumerate() {
            candidate.fused_rank = idx + 1;
        }
        Ok(results)
    }

    async fn hyde_rewrite(&self, query: &str, analysis: &QueryAnalysis) -> String {
        if let Some(completion) = &self.completion {
            let prompt = format!(
                "Write one short factual passage that would answer this question. \
                 Output only the passage.\n\nQuestion: {query}"
            );
            match completion.complete(&prompt).await {
                Ok(passage) if !passage.trim().is_empty() => return passage.trim().to_string(),
                Ok(_) => {},
                Err(err) => {
                    tracing::warn!(error = %err, "HyDE completion failed; using heuristic rewrite");
                },
            }
        }
        // Heuristic hypothetical answer: drop the question scaffolding and
        // keep the content-bearing terms as a statement.
        format!("{} explained in detail", analysis.keywords.join(" "))
    }

    async fn step_back_rewrite(&self, query: &str, analysis: &QueryAnalysis) -> String {
        if let Some(completion) = &self.completion {
            let prompt = format!(
                "Rewrite this question as one broader background question about the \
                 same topic. Output only the question.\n\nQuestion: {query}"
            );
            match completion.complete(&prompt).await {
                Ok(rewritten) if !rewritten.trim().is_empty() => {
                    return rewritten.trim().to_string()
                },
                Ok(_) => {},
                Err(err) => {
                    tracing::warn!(error = %err, "Step-back completion failed; using heuristic rewrite");
                },
            }
        }
        // Heuristic generalization: keep the leading content terms only.
        let broad: Vec<&str> = analysis
            .keywords
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        if broad.is_empty() {
            query.to_string()
        } else {
            format!("{} overview", broad.join(" "))
        }
    }
}

/// Race a collaborator future against the caller's cancellation token
async fn with_cancellation<T>(
    operation: &str,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RagError::Cancelled {
            operation: operation.to_string(),
        }),
        out = fut => out,
    }
}

fn candidates_from_vector(chunks: &[ScoredChunk]) -> Vec<RankedCandidate> {
    chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| RankedCandidate {
            chunk_id: chunk.chunk_id.clone(),
            document_id: chunk.document_id.clone(),
            content: chunk.content.clone(),
            vector_score: Some(chunk.score),
            sparse_score: None,
            vector_rank: Some(idx + 1),
            sparse_rank: None,
            fused_score: chunk.score,
            fused_rank: idx + 1,
            matched_terms: Vec::new(),
            source: CandidateSource::Vector,
            metadata: chunk.metadata.clone(),
        })
        .collect()
}

fn candidates_from_sparse(hits: &[SparseHit]) -> Vec<RankedCandidate> {
    hits.iter()
        .enumerate()
        .map(|(idx, hit)| RankedCandidate {
            chunk_id: hit.chunk_id.clone(),
            document_id: hit.document_id.clone(),
            content: hit.content.clone(),
            vector_score: None,
            sparse_score: Some(hit.score),
            vector_rank: None,
            sparse_rank: Some(idx + 1),
            fused_score: hit.score,
            fused_rank: idx + 1,
            matched_terms: hit.matched_terms.clone(),
            source: CandidateSource::Sparse,
            metadata: hit.metadata.clone(),
        })
        .collect()
}

/// Deterministic paraphrase generation for MultiQuery
///
/// Always includes the original query; comparative queries additionally get
/// one sub-query per compared side so both sides are covered evenly.
fn paraphrases_for(query: &str, analysis: &QueryAnalysis) -> Vec<String> {
    let mut paraphrases = vec![query.to_string()];

    if !analysis.keywords.is_empty() {
        paraphrases.push(analysis.keywords.join(" "));
    }
    if !analysis.concepts.is_empty() && analysis.concepts.len() < analysis.keywords.len() {
        paraphrases.push(analysis.concepts.join(" "));
    }
    if analysis.has_comparative_context {
        for side in comparison_sides(query) {
            paraphrases.push(side);
        }
    }

    let mut seen = std::collections::HashSet::new();
    paraphrases.retain(|p| !p.trim().is_empty() && seen.insert(p.clone()));
    paraphrases
}

/// Split a comparative query into its compared sides
///
/// Works on the lowercased query so the separator match and the slice
/// positions always agree.
fn comparison_sides(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    for separator in [" vs ", " versus ", " compared to ", " and "] {
        if let Some(pos) = lower.find(separator) {
            let left = lower[..pos].trim();
            let right = lower[pos + separator.len()..]
                .trim()
                .trim_end_matches(['?', '.']);
            if !left.is_empty() && !right.is_empty() {
                return vec![left.to_string(), right.to_string()];
            }
        }
    }
    Vec::new()
}
