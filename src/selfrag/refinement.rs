//! Query refinement for the Self-RAG loop
//!
//! When an iteration's quality falls short, the refiner rewrites the query
//! before the next attempt. Rewrites are pluggable: four deterministic
//! heuristics cover the common failure modes, and an optional
//! [`TextCompletion`] collaborator can produce a model-generated rewrite
//! instead. Refiner failures never abort the loop; the caller degrades to
//! strategy rotation.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::analysis::QueryAnalyzer;
use crate::core::{RagError, Result, TextCompletion};
use crate::retrieval::RankedCandidate;
use crate::selfrag::quality::{QualityAssessment, QualityIssueKind};

/// Kind of rewrite applied to a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum RefinementKind {
    /// Drop narrowing terms to widen recall
    Generalize,
    /// Add discriminating terms drawn from the strongest results
    Specify,
    /// Append surrounding domain vocabulary
    AddContext,
    /// Reorder terms to change the retrieval emphasis
    Restructure,
}

/// A rewritten query with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedQuery {
    /// The rewritten query text
    pub query: String,
    /// Which rewrite produced it
    pub kind: RefinementKind,
    /// Why this rewrite was chosen
    pub rationale: String,
}

/// One pluggable rewrite heuristic
pub trait RewriteStrategy: Send + Sync {
    /// The rewrite kind this strategy implements
    fn kind(&self) -> RefinementKind;

    /// Rewrite `query`, or return `None` when no meaningful change exists
    fn rewrite(
        &self,
        query: &str,
        assessment: &QualityAssessment,
        results: &[RankedCandidate],
    ) -> Option<String>;
}

/// Keeps only the leading content terms, widening recall
struct Generalize {
    analyzer: QueryAnalyzer,
}

impl RewriteStrategy for Generalize {
    fn kind(&self) -> RefinementKind {
        RefinementKind::Generalize
    }

    fn rewrite(
        &self,
        query: &str,
        _assessment: &QualityAssessment,
        _results: &[RankedCandidate],
    ) -> Option<String> {
        let keywords = self.analyzer.analyze(query).keywords;
        if keywords.len() < 2 {
            return None;
        }
        let keep = (keywords.len() / 2).max(2).min(keywords.len() - 1);
        let broad = keywords[..keep].join(" ");
        (broad != query.to_lowercase()).then_some(broad)
    }
}

/// Appends discriminating terms found in the strongest results
struct Specify {
    analyzer: QueryAnalyzer,
}

impl RewriteStrategy for Specify {
    fn kind(&self) -> RefinementKind {
        RefinementKind::Specify
    }

    fn rewrite(
        &self,
        query: &str,
        _assessment: &QualityAssessment,
        results: &[RankedCandidate],
    ) -> Option<String> {
        let extra = result_terms_not_in_query(&self.analyzer, query, results, 2);
        if extra.is_empty() {
            return None;
        }
        Some(format!("{query} {}", extra.join(" ")))
    }
}

/// Appends recognized domain concepts around the query
struct AddContext {
    analyzer: QueryAnalyzer,
}

impl RewriteStrategy for AddContext {
    fn kind(&self) -> RefinementKind {
        RefinementKind::AddContext
    }

    fn rewrite(
        &self,
        query: &str,
        _assessment: &QualityAssessment,
        results: &[RankedCandidate],
    ) -> Option<String> {
        let analysis = self.analyzer.analyze(query);
        let query_terms: HashSet<&String> = analysis.keywords.iter().collect();

        // Matched sparse terms are the closest thing to corpus vocabulary
        // for this query; fall back to raw result terms.
        let mut context: Vec<String> = results
            .iter()
            .flat_map(|r| r.matched_terms.iter())
            .filter(|t| !query_terms.contains(*t))
            .take(2)
            .cloned()
            .collect();
        if context.is_empty() {
            context = result_terms_not_in_query(&self.analyzer, query, results, 2);
        }
        if context.is_empty() {
            return None;
        }
        Some(format!("{query} in the context of {}", context.join(" ")))
    }
}

/// Reorders content terms so retrieval emphasis shifts
struct Restructure {
    analyzer: QueryAnalyzer,
}

impl RewriteStrategy for Restructure {
    fn kind(&self) -> RefinementKind {
        RefinementKind::Restructure
    }

    fn rewrite(
        &self,
        query: &str,
        _assessment: &QualityAssessment,
        _results: &[RankedCandidate],
    ) -> Option<String> {
        let mut keywords = self.analyzer.analyze(query).keywords;
        if keywords.len() < 2 {
            return None;
        }
        keywords.reverse();
        let restructured = keywords.join(" ");
        (restructured != query.to_lowercase()).then_some(restructured)
    }
}

/// Frequent content terms from the top results that the query lacks
fn result_terms_not_in_query(
    analyzer: &QueryAnalyzer,
    query: &str,
    results: &[RankedCandidate],
    limit: usize,
) -> Vec<String> {
    let query_terms: HashSet<String> = analyzer.analyze(query).keywords.into_iter().collect();
    let mut counts: indexmap::IndexMap<String, usize> = indexmap::IndexMap::new();
    for result in results.iter().take(5) {
        for term in analyzer.analyze(&result.content).keywords {
            if !query_terms.contains(&term) {
                *counts.entry(term).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.into_iter().take(limit).map(|(term, _)| term).collect()
}

/// Plans and applies query rewrites between loop iterations
pub struct QueryRefiner {
    strategies: Vec<Box<dyn RewriteStrategy>>,
    completion: Option<Arc<dyn TextCompletion>>,
}

impl Default for QueryRefiner {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRefiner {
    /// Create a refiner with the four built-in heuristics
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(Generalize { analyzer: QueryAnalyzer::new() }),
                Box::new(Specify { analyzer: QueryAnalyzer::new() }),
                Box::new(AddContext { analyzer: QueryAnalyzer::new() }),
                Box::new(Restructure { analyzer: QueryAnalyzer::new() }),
            ],
            completion: None,
        }
    }

    /// Prefer model-generated rewrites, keeping heuristics as fallback
    pub fn with_text_completion(mut self, completion: Arc<dyn TextCompletion>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Rewrite kinds worth trying, worst issue first
    pub fn plan(&self, assessment: &QualityAssessment) -> Vec<RefinementKind> {
        let mut kinds = Vec::new();
        for issue in &assessment.issues {
            let kind = match issue.kind {
                QualityIssueKind::InsufficientResults => RefinementKind::Generalize,
                QualityIssueKind::InsufficientRelevance => RefinementKind::AddContext,
                QualityIssueKind::LackOfDiversity => RefinementKind::Restructure,
                QualityIssueKind::DuplicateResults => RefinementKind::Restructure,
            };
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        // A result set can miss the quality bar without tripping any issue
        // heuristic; sharpening the query is the default response.
        for fallback in [RefinementKind::Specify, RefinementKind::Restructure] {
            if !kinds.contains(&fallback) {
                kinds.push(fallback);
            }
        }
        kinds
    }

    /// Produce a rewritten query for the next iteration
    ///
    /// Errors only when no rewrite can change the query; the loop treats
    /// that as a signal to rotate strategies instead.
    pub async fn refine(
        &self,
        query: &str,
        assessment: &QualityAssessment,
        results: &[RankedCandidate],
    ) -> Result<RefinedQuery> {
        let kinds = self.plan(assessment);

        if let Some(completion) = &self.completion {
            match self.model_rewrite(completion.as_ref(), query, assessment, kinds[0]).await {
                Ok(Some(refined)) => return Ok(refined),
                Ok(None) => {},
                Err(err) => {
                    tracing::warn!(error = %err, "Model rewrite failed; trying heuristics");
                },
            }
        }

        for kind in &kinds {
            let strategy = self.strategies.iter().find(|s| s.kind() == *kind);
            if let Some(strategy) = strategy {
                if let Some(rewritten) = strategy.rewrite(query, assessment, results) {
                    if rewritten.trim() != query.trim() {
                        tracing::debug!(kind = %kind, rewritten, "Heuristic query rewrite");
                        return Ok(RefinedQuery {
                            query: rewritten,
                            kind: *kind,
                            rationale: format!("Heuristic {kind} rewrite"),
                        });
                    }
                }
            }
        }

        Err(RagError::Refinement {
            message: format!("no rewrite could change query \"{query}\""),
        })
    }

    async fn model_rewrite(
        &self,
        completion: &dyn TextCompletion,
        query: &str,
        assessment: &QualityAssessment,
        kind: RefinementKind,
    ) -> Result<Option<RefinedQuery>> {
        let guidance = match kind {
            RefinementKind::Generalize => "Make it broader so more documents match.",
            RefinementKind::Specify => "Make it more specific so results are more precise.",
            RefinementKind::AddContext => "Add clarifying context about the topic.",
            RefinementKind::Restructure => "Rephrase it so different documents match.",
        };
        let issues: Vec<&str> = assessment
            .issues
            .iter()
            .map(|i| i.recommended_action.as_str())
            .collect();
        let prompt = format!(
            "Rewrite this search query. {guidance}\nKnown problems: {}\n\
             Output only the rewritten query.\n\nQuery: {query}",
            issues.join("; ")
        );
        let rewritten = completion.complete(&prompt).await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() || rewritten == query.trim() {
            return Ok(None);
        }
        Ok(Some(RefinedQuery {
            query: rewritten.to_string(),
            kind,
            rationale: format!("Model {kind} rewrite"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_providers::MockTextCompletion;
    use crate::retrieval::CandidateSource;
    use crate::selfrag::quality::{fallback_assessment, QualityAssessor};
    use std::collections::HashMap;

    fn candidate(id: &str, content: &str, matched: &[&str]) -> RankedCandidate {
        RankedCandidate {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            content: content.to_string(),
            vector_score: Some(0.8),
            sparse_score: None,
            vector_rank: Some(1),
            sparse_rank: None,
            fused_score: 0.8,
            fused_rank: 1,
            matched_terms: matched.iter().map(|t| t.to_string()).collect(),
            source: CandidateSource::Vector,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn empty_results_plan_leads_with_generalize() {
        let assessor = QualityAssessor::new();
        let assessment = assessor.assess("rust async runtime details", &[], 3).unwrap();
        let plan = QueryRefiner::new().plan(&assessment);
        assert_eq!(plan[0], RefinementKind::Generalize);
    }

    #[tokio::test]
    async fn generalize_shortens_the_query() {
        let refiner = QueryRefiner::new();
        let assessor = QualityAssessor::new();
        let query = "tokio runtime worker thread scheduling latency regression";
        let assessment = assessor.assess(query, &[], 3).unwrap();

        let refined = refiner.refine(query, &assessment, &[]).await.unwrap();
        assert_eq!(refined.kind, RefinementKind::Generalize);
        assert!(refined.query.split_whitespace().count() < query.split_whitespace().count());
    }

    #[tokio::test]
    async fn add_context_uses_matched_terms() {
        let refiner = QueryRefiner::new();
        let assessor = QualityAssessor::new();
        let results = vec![
            candidate("a", "completely unrelated cooking recipe text", &["sourdough"]),
            candidate("b", "another unrelated gardening passage", &["compost"]),
        ];
        let query = "borrow checker lifetimes";
        let assessment = assessor.assess(query, &results, 1).unwrap();
        assert!(assessment
            .issues
            .iter()
            .any(|i| i.kind == QualityIssueKind::InsufficientRelevance));

        let refined = refiner.refine(query, &assessment, &results).await.unwrap();
        assert_eq!(refined.kind, RefinementKind::AddContext);
        assert!(refined.query.contains("sourdough"));
    }

    #[tokio::test]
    async fn single_keyword_query_with_no_results_rotates_out() {
        let refiner = QueryRefiner::new();
        let assessment = fallback_assessment(0);
        let err = refiner.refine("rust", &assessment, &[]).await.unwrap_err();
        assert!(matches!(err, RagError::Refinement { .. }));
    }

    #[tokio::test]
    async fn model_rewrite_takes_precedence() {
        let completion = Arc::new(MockTextCompletion::with_response("broader rust query"));
        let refiner = QueryRefiner::new().with_text_completion(completion);
        let assessment = fallback_assessment(0);
        let refined = refiner
            .refine("rust async runtime scheduling", &assessment, &[])
            .await
            .unwrap();
        assert_eq!(refined.query, "broader rust query");
        assert!(refined.rationale.starts_with("Model"));
    }
}
