//! Quality-driven Self-RAG refinement loop
//!
//! Wraps the adaptive orchestrator in a bounded retry loop: search, grade
//! the results, and when they fall short either rewrite the query or switch
//! strategy before trying again. The loop always terminates within the
//! configured iteration budget and always reports how it ended.

pub mod quality;
pub mod refinement;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{RagError, Result, TextCompletion};
use crate::orchestrator::{
    next_in_rotation, AdaptiveSearchOrchestrator, SearchOptions, SearchStrategy,
};
use crate::retrieval::RankedCandidate;

pub use quality::{
    AssessmentError, QualityAssessment, QualityAssessor, QualityIssue, QualityIssueKind,
    QualityRationale,
};
pub use refinement::{QueryRefiner, RefinedQuery, RefinementKind, RewriteStrategy};

/// Exhaustion results count as success down to this fraction of the
/// configured threshold
const RELAXED_FLOOR: f32 = 0.8;

/// Options for one Self-RAG search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfRagOptions {
    /// Options forwarded to every orchestrator invocation
    pub search: SearchOptions,
    /// Overall quality score that ends the loop early
    pub quality_threshold: f32,
    /// Result count below which the set is graded as insufficient
    pub min_results: usize,
    /// Hard upper bound on search iterations (at least 1)
    pub max_iterations: usize,
    /// Rewrite queries between iterations; when false the loop only
    /// rotates strategies
    pub enable_auto_refinement: bool,
}

impl Default for SelfRagOptions {
    fn default() -> Self {
        Self {
            search: SearchOptions::default(),
            quality_threshold: 0.7,
            min_results: 3,
            max_iterations: 3,
            enable_auto_refinement: true,
        }
    }
}

impl SelfRagOptions {
    fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(RagError::Config {
                message: "max_iterations must be at least 1".to_string(),
            });
        }
        if !self.quality_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.quality_threshold)
        {
            return Err(RagError::Config {
                message: format!(
                    "quality_threshold must be in [0, 1], got {}",
                    self.quality_threshold
                ),
            });
        }
        Ok(())
    }
}

/// What the loop decided to change before the next iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefinementAction {
    /// The query was rewritten
    RewriteQuery {
        /// The rewritten query used next
        query: String,
        /// Which rewrite produced it
        kind: RefinementKind,
        /// Why this rewrite was chosen
        rationale: String,
    },
    /// The strategy was switched while the query stayed unchanged
    SwitchStrategy {
        /// Strategy forced for the next iteration
        strategy: SearchStrategy,
        /// Why the switch happened
        reason: String,
    },
}

/// Record of one completed loop iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIteration {
    /// 1-based iteration number
    pub iteration: usize,
    /// Query text this iteration searched with
    pub query: String,
    /// Strategy the orchestrator executed
    pub strategy: SearchStrategy,
    /// Number of results the iteration produced
    pub result_count: usize,
    /// Quality grade of the iteration's results
    pub assessment: QualityAssessment,
    /// What changed before the next iteration, if anything
    pub next_action: Option<RefinementAction>,
    /// Wall-clock time of the iteration's search
    pub elapsed: Duration,
}

/// Final outcome of a Self-RAG search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfRagResult {
    /// Results of the winning iteration
    pub results: Vec<RankedCandidate>,
    /// Query text the winning iteration searched with
    pub final_query: String,
    /// Quality grade of the returned results
    pub final_assessment: QualityAssessment,
    /// Whether the loop considers the outcome good enough
    pub success: bool,
    /// Why the loop stopped
    pub termination_reason: String,
    /// Every iteration, in execution order
    pub iterations: Vec<SearchIteration>,
    /// Total wall-clock time across all iterations
    pub elapsed: Duration,
}

impl SelfRagResult {
    /// Every refinement action taken across the loop, in execution order
    ///
    /// The final iteration never carries an action, so the list is always
    /// one shorter than a fully-refined run's iteration count.
    pub fn refinement_actions(&self) -> Vec<&RefinementAction> {
        self.iterations
            .iter()
            .filter_map(|i| i.next_action.as_ref())
            .collect()
    }
}

/// Bounded search-assess-refine loop over an [`AdaptiveSearchOrchestrator`]
pub struct SelfRagLoop {
    orchestrator: Arc<AdaptiveSearchOrchestrator>,
    assessor: QualityAssessor,
    refiner: QueryRefiner,
}

impl SelfRagLoop {
    /// Create a loop over `orchestrator` with the built-in heuristics
    pub fn new(orchestrator: Arc<AdaptiveSearchOrchestrator>) -> Self {
        Self {
            orchestrator,
            assessor: QualityAssessor::new(),
            refiner: QueryRefiner::new(),
        }
    }

    /// Use a text-completion collaborator for query rewrites
    pub fn with_text_completion(mut self, completion: Arc<dyn TextCompletion>) -> Self {
        self.refiner = self.refiner.with_text_completion(completion);
        self
    }

    /// Run the refinement loop
    ///
    /// Orchestrator errors abort the loop and propagate; refinement
    /// failures degrade to strategy rotation and never abort.
    pub async fn search(
        &self,
        query: &str,
        options: &SelfRagOptions,
        cancel: &CancellationToken,
    ) -> Result<SelfRagResult> {
        options.validate()?;
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput {
                message: "query must not be empty".to_string(),
            });
        }

        let started = Instant::now();
        let mut iterations: Vec<SearchIteration> = Vec::new();
        let mut current_query = query.to_string();
        let mut forced_strategy: Option<SearchStrategy> = None;
        // Winning iteration so far: (index into `iterations`, score, results).
        let mut best: Option<(usize, f32, Vec<RankedCandidate>)> = None;

        for iteration in 1..=options.max_iterations {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled {
                    operation: "selfrag_search".to_string(),
                });
            }

            // Later iterations must retrieve fresh even when the query text
            // repeats, so only the first consults the result cache.
            let search_options = SearchOptions {
                force_strategy: forced_strategy.or(options.search.force_strategy),
                use_cache: options.search.use_cache && iteration == 1,
                ..options.search.clone()
            };

            let iteration_started = Instant::now();
            let response = self
                .orchestrator
                .search(&current_query, &search_options, cancel)
                .await?;
            let elapsed = iteration_started.elapsed();

            let assessment =
                self.assessor
                    .assess_or_fallback(&current_query, &response.results, options.min_results);
            tracing::info!(
                iteration,
                strategy = %response.used_strategy,
                score = assessment.overall_score,
                results = response.results.len(),
                "Self-RAG iteration complete"
            );

            let record_index = iterations.len();
            iterations.push(SearchIteration {
                iteration,
                query: current_query.clone(),
                strategy: response.used_strategy,
                result_count: response.results.len(),
                assessment: assessment.clone(),
                next_action: None,
                elapsed,
            });

            let is_best = best
                .as_ref()
                .map(|(_, score, _)| assessment.overall_score > *score)
                .unwrap_or(true);
            if is_best {
                best = Some((record_index, assessment.overall_score, response.results.clone()));
            }

            if assessment.overall_score >= options.quality_threshold
                && response.results.len() >= options.min_results
            {
                return Ok(SelfRagResult {
                    results: response.results,
                    final_query: current_query,
                    final_assessment: assessment,
                    success: true,
                    termination_reason: "Quality threshold reached".to_string(),
                    iterations,
                    elapsed: started.elapsed(),
                });
            }

            if iteration == options.max_iterations {
                break;
            }

            let action = self
                .plan_next(
                    &current_query,
                    response.used_strategy,
                    &assessment,
                    &response.results,
                    options,
                )
                .await;
            match &action {
                RefinementAction::RewriteQuery { query, .. } => {
                    current_query = query.clone();
                    forced_strategy = None;
                },
                RefinementAction::SwitchStrategy { strategy, .. } => {
                    forced_strategy = Some(*strategy);
                },
            }
            iterations[record_index].next_action = Some(action);
        }

        // Iteration budget exhausted; return the best-scoring iteration and
        // grade it against the relaxed floor.
        let (best_index, best_score, best_results) = best.ok_or_else(|| RagError::Config {
            message: "iteration loop produced no iterations".to_string(),
        })?;
        let winner = &iterations[best_index];
        let success = best_score >= options.quality_threshold * RELAXED_FLOOR;
        Ok(SelfRagResult {
            results: best_results,
            final_query: winner.query.clone(),
            final_assessment: winner.assessment.clone(),
            success,
            termination_reason: "Maximum iterations reached".to_string(),
            iterations,
            elapsed: started.elapsed(),
        })
    }

    /// Decide what to change before the next iteration
    async fn plan_next(
        &self,
        query: &str,
        current_strategy: SearchStrategy,
        assessment: &QualityAssessment,
        results: &[RankedCandidate],
        options: &SelfRagOptions,
    ) -> RefinementAction {
        if !options.enable_auto_refinement {
            return RefinementAction::SwitchStrategy {
                strategy: next_in_rotation(current_strategy),
                reason: "Auto-refinement disabled; rotating strategy".to_string(),
            };
        }

        // Low diversity is a retrieval-shape problem, not a query-wording
        // problem; fanning out paraphrases attacks it directly.
        let lacks_diversity = assessment
            .issues
            .iter()
            .any(|i| i.kind == QualityIssueKind::LackOfDiversity);
        if lacks_diversity && current_strategy != SearchStrategy::MultiQuery {
            return RefinementAction::SwitchStrategy {
                strategy: SearchStrategy::MultiQuery,
                reason: "Results lack diversity; fanning out paraphrases".to_string(),
            };
        }

        match self.refiner.refine(query, assessment, results).await {
            Ok(refined) => RefinementAction::RewriteQuery {
                query: refined.query,
                kind: refined.kind,
                rationale: refined.rationale,
            },
            Err(err) => {
                tracing::warn!(error = %err, "Query refinement failed; rotating strategy");
                RefinementAction::SwitchStrategy {
                    strategy: next_in_rotation(current_strategy),
                    reason: "Refinement produced no usable rewrite; rotating strategy"
                        .to_string(),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_providers::{MockEmbedder, MockSparseRetriever, MockVectorStore};

    fn seeded_orchestrator() -> Arc<AdaptiveSearchOrchestrator> {
        let embedder = Arc::new(MockEmbedder::new(64));
        let mut store = MockVectorStore::new(64);
        let mut sparse = MockSparseRetriever::new();
        let corpus = [
            ("c1", "d1", "tokio schedules async tasks across worker threads"),
            ("c2", "d1", "the tokio runtime parks idle worker threads"),
            ("c3", "d2", "channels move messages between async tasks safely"),
            ("c4", "d2", "spawn blocking offloads cpu heavy work from the runtime"),
            ("c5", "d3", "select races multiple async branches and takes the first"),
        ];
        for (chunk, doc, content) in corpus {
            store.index(chunk, doc, content, &embedder);
            sparse.index(chunk, doc, content);
        }
        Arc::new(AdaptiveSearchOrchestrator::new(
            embedder,
            Arc::new(store),
            Arc::new(sparse),
        ))
    }

    #[tokio::test]
    async fn zero_iterations_is_a_config_error() {
        let looper = SelfRagLoop::new(seeded_orchestrator());
        let options = SelfRagOptions {
            max_iterations: 0,
            ..Default::default()
        };
        let err = looper
            .search("tokio tasks", &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Config { .. }));
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_any_iteration() {
        let looper = SelfRagLoop::new(seeded_orchestrator());
        let err = looper
            .search("   ", &SelfRagOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn unreachable_threshold_exhausts_the_budget() {
        let looper = SelfRagLoop::new(seeded_orchestrator());
        let options = SelfRagOptions {
            quality_threshold: 0.99,
            max_iterations: 2,
            ..Default::default()
        };
        let outcome = looper
            .search("tokio async worker threads", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.iterations.len(), 2);
        assert_eq!(outcome.termination_reason, "Maximum iterations reached");
    }

    #[tokio::test]
    async fn low_threshold_stops_after_one_iteration() {
        let looper = SelfRagLoop::new(seeded_orchestrator());
        let options = SelfRagOptions {
            quality_threshold: 0.05,
            min_results: 1,
            ..Default::default()
        };
        let outcome = looper
            .search("tokio async worker threads", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.iterations.len(), 1);
        assert_eq!(outcome.termination_reason, "Quality threshold reached");
        assert!(outcome.iterations[0].next_action.is_none());
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let looper = SelfRagLoop::new(seeded_orchestrator());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = looper
            .search("tokio tasks", &SelfRagOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn disabled_refinement_rotates_strategies() {
        let looper = SelfRagLoop::new(seeded_orchestrator());
        let options = SelfRagOptions {
            quality_threshold: 0.99,
            max_iterations: 3,
            enable_auto_refinement: false,
            ..Default::default()
        };
        let outcome = looper
            .search("tokio async worker threads", &options, &CancellationToken::new())
            .await
            .unwrap();
        for iteration in &outcome.iterations[..outcome.iterations.len() - 1] {
            assert!(matches!(
                iteration.next_action,
                Some(RefinementAction::SwitchStrategy { .. })
            ));
        }
        // The query text never changes when only strategies rotate.
        assert!(outcome
            .iterations
            .iter()
            .all(|i| i.query == "tokio async worker threads"));
    }
}
