//! Result quality assessment for the Self-RAG loop
//!
//! Grades a result set on five independent dimensions and derives typed
//! issues the refinement planner can act on. Scoring failures are absorbed
//! by a conservative fallback assessment so a failure to grade never
//! crashes an otherwise-successful search.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::QueryAnalyzer;
use crate::retrieval::RankedCandidate;

/// Weights of the overall score combination
const W_RELEVANCE: f32 = 0.35;
const W_COMPLETENESS: f32 = 0.25;
const W_DIVERSITY: f32 = 0.15;
const W_CREDIBILITY: f32 = 0.15;
const W_FRESHNESS: f32 = 0.10;

/// Neutral priors used when per-result metadata is absent
const CREDIBILITY_PRIOR: f32 = 0.8;
const FRESHNESS_PRIOR: f32 = 0.7;

/// Error types for quality assessment
#[derive(Debug, Error)]
pub enum AssessmentError {
    /// A computed metric is NaN, infinite, or outside [0, 1]
    #[error("Invalid metric value: {metric} = {value}")]
    InvalidValue {
        /// Name of the offending metric
        metric: &'static str,
        /// The invalid value that was computed
        value: f32,
    },
}

/// Category of a detected quality problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityIssueKind {
    /// Too few results came back
    InsufficientResults,
    /// Results barely overlap the query terms
    InsufficientRelevance,
    /// Results are near-copies of each other topically
    LackOfDiversity,
    /// Near-identical chunks appear more than once
    DuplicateResults,
}

/// One detected quality problem with a recommended fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    /// Problem category
    pub kind: QualityIssueKind,
    /// Severity from 1 (cosmetic) to 5 (unusable)
    pub severity: u8,
    /// What the refinement step should do about it
    pub recommended_action: String,
}

/// Free-text rationale for each sub-score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityRationale {
    /// Why relevance scored as it did
    pub relevance: String,
    /// Why completeness scored as it did
    pub completeness: String,
    /// Why diversity scored as it did
    pub diversity: String,
    /// Why credibility scored as it did
    pub credibility: String,
    /// Why freshness scored as it did
    pub freshness: String,
}

/// Graded quality of one iteration's results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Fraction of query terms found in result contents, averaged
    pub relevance: f32,
    /// Result-count adequacy, content length, and topical coverage
    pub completeness: f32,
    /// 1 − mean pairwise token-set Jaccard similarity
    pub diversity: f32,
    /// Metadata-derived source credibility (neutral prior 0.8)
    pub credibility: f32,
    /// Metadata-derived freshness (neutral prior 0.7)
    pub freshness: f32,
    /// Weighted combination of the five sub-scores
    pub overall_score: f32,
    /// Detected problems, worst first
    pub issues: Vec<QualityIssue>,
    /// Per-sub-score explanation
    pub rationale: QualityRationale,
}

/// Grades result sets against the query that produced them
#[derive(Debug, Default)]
pub struct QualityAssessor {
    analyzer: QueryAnalyzer,
}

impl QualityAssessor {
    /// Create an assessor with the default term extractor
    pub fn new() -> Self {
        Self::default()
    }

    /// Grade `results` against `query`, falling back to a conservative
    /// fixed assessment when scoring itself fails
    pub fn assess_or_fallback(
        &self,
        query: &str,
        results: &[RankedCandidate],
        min_results: usize,
    ) -> QualityAssessment {
        match self.assess(query, results, min_results) {
            Ok(assessment) => assessment,
            Err(err) => {
                tracing::warn!(error = %err, "Quality scoring failed; using fallback assessment");
                fallback_assessment(results.len())
            },
        }
    }

    /// Grade `results` against `query`
    pub fn assess(
        &self,
        query: &str,
        results: &[RankedCandidate],
        min_results: usize,
    ) -> std::result::Result<QualityAssessment, AssessmentError> {
        let query_terms: Vec<String> = self.analyzer.analyze(query).keywords;
        let token_sets: Vec<HashSet<String>> = results
            .iter()
            .map(|r| tokens_of(&r.content))
            .collect();

        let relevance = relevance_score(&query_terms, &token_sets);
        let completeness = completeness_score(&query_terms, results, &token_sets);
        let diversity = diversity_score(&token_sets);
        let credibility = metadata_mean(results, "credibility", CREDIBILITY_PRIOR);
        let freshness = metadata_mean(results, "freshness", FRESHNESS_PRIOR);

        for (metric, value) in [
            ("relevance", relevance),
            ("completeness", completeness),
            ("diversity", diversity),
            ("credibility", credibility),
            ("freshness", freshness),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(AssessmentError::InvalidValue { metric, value });
            }
        }

        let overall_score = W_RELEVANCE * relevance
            + W_COMPLETENESS * completeness
            + W_DIVERSITY * diversity
            + W_CREDIBILITY * credibility
            + W_FRESHNESS * freshness;

        let mut issues = derive_issues(results.len(), min_results, relevance, diversity, &token_sets);
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));

        Ok(QualityAssessment {
            relevance,
            completeness,
            diversity,
            credibility,
            freshness,
            overall_score,
            issues,
            rationale: QualityRationale {
                relevance: format!(
                    "{:.0}% of query terms appear in the average result",
                    relevance * 100.0
                ),
                completeness: format!(
                    "{} results graded for count adequacy, length, and term coverage",
                    results.len()
                ),
                diversity: format!(
                    "Mean pairwise content overlap is {:.0}%",
                    (1.0 - diversity) * 100.0
                ),
                credibility: rationale_for_metadata(results, "credibility", CREDIBILITY_PRIOR),
                freshness: rationale_for_metadata(results, "freshness", FRESHNESS_PRIOR),
            },
        })
    }
}

/// Conservative fixed assessment used when scoring fails
pub fn fallback_assessment(result_count: usize) -> QualityAssessment {
    let mut issues = Vec::new();
    if result_count < 5 {
        issues.push(QualityIssue {
            kind: QualityIssueKind::InsufficientResults,
            severity: 3,
            recommended_action: "Generalize the query to widen recall".to_string(),
        });
    }
    let relevance = 0.5;
    let completeness = 0.5;
    let diversity = 0.5;
    let overall_score = W_RELEVANCE * relevance
        + W_COMPLETENESS * completeness
        + W_DIVERSITY * diversity
        + W_CREDIBILITY * CREDIBILITY_PRIOR
        + W_FRESHNESS * FRESHNESS_PRIOR;
    QualityAssessment {
        relevance,
        completeness,
        diversity,
        credibility: CREDIBILITY_PRIOR,
        freshness: FRESHNESS_PRIOR,
        overall_score,
        issues,
        rationale: QualityRationale {
            relevance: "Fallback: scoring failed, neutral value substituted".to_string(),
            completeness: "Fallback: scoring failed, neutral value substituted".to_string(),
            diversity: "Fallback: scoring failed, neutral value substituted".to_string(),
            credibility: "Fallback: neutral prior".to_string(),
            freshness: "Fallback: neutral prior".to_string(),
        },
    }
}

fn tokens_of(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn relevance_score(query_terms: &[String], token_sets: &[HashSet<String>]) -> f32 {
    if query_terms.is_empty() || token_sets.is_empty() {
        return 0.0;
    }
    let per_result: f32 = token_sets
        .iter()
        .map(|tokens| {
            let hits = query_terms.iter().filter(|t| tokens.contains(*t)).count();
            hits as f32 / query_terms.len() as f32
        })
        .sum();
    per_result / token_sets.len() as f32
}

fn completeness_score(
    query_terms: &[String],
    results: &[RankedCandidate],
    token_sets: &[HashSet<String>],
) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    // Count adequacy saturates at 10 results, length at 500 characters,
    // coverage over the top 20 results.
    let count_adequacy = (results.len() as f32 / 10.0).min(1.0);
    let avg_len: f32 =
        results.iter().map(|r| r.content.chars().count() as f32).sum::<f32>() / results.len() as f32;
    let length_adequacy = (avg_len / 500.0).min(1.0);
    let coverage = if query_terms.is_empty() {
        0.0
    } else {
        let covered: HashSet<&String> = token_sets
            .iter()
            .take(20)
            .flat_map(|tokens| query_terms.iter().filter(|t| tokens.contains(*t)))
            .collect();
        covered.len() as f32 / query_terms.len() as f32
    };
    0.4 * count_adequacy + 0.3 * length_adequacy + 0.3 * coverage
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        1.0
    } else {
        intersection as f32 / union as f32
    }
}

fn diversity_score(token_sets: &[HashSet<String>]) -> f32 {
    let window = &token_sets[..token_sets.len().min(10)];
    if window.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0;
    for i in 0..window.len() {
        for j in (i + 1)..window.len() {
            total += jaccard(&window[i], &window[j]);
            pairs += 1;
        }
    }
    1.0 - total / pairs as f32
}

fn metadata_mean(results: &[RankedCandidate], key: &str, prior: f32) -> f32 {
    if results.is_empty() {
        return prior;
    }
    let sum: f32 = results
        .iter()
        .map(|r| r.metadata_score(key).unwrap_or(prior))
        .sum();
    sum / results.len() as f32
}

fn rationale_for_metadata(results: &[RankedCandidate], key: &str, prior: f32) -> String {
    let with_metadata = results.iter().filter(|r| r.metadata_score(key).is_some()).count();
    if with_metadata == 0 {
        format!("No {key} metadata; neutral prior {prior} applied")
    } else {
        format!("{with_metadata}/{} results carry {key} metadata", results.len())
    }
}

fn derive_issues(
    count: usize,
    min_results: usize,
    relevance: f32,
    diversity: f32,
    token_sets: &[HashSet<String>],
) -> Vec<QualityIssue> {
    let mut issues = Vec::new();

    if count < min_results {
        issues.push(QualityIssue {
            kind: QualityIssueKind::InsufficientResults,
            severity: if count == 0 { 5 } else { 3 },
            recommended_action: "Generalize the query to widen recall".to_string(),
        });
    }
    if count > 0 && relevance < 0.5 {
        issues.push(QualityIssue {
            kind: QualityIssueKind::InsufficientRelevance,
            severity: if relevance < 0.2 { 4 } else { 2 },
            recommended_action: "Add clarifying context terms to the query".to_string(),
        });
    }
    if count >= 2 && diversity < 0.4 {
        issues.push(QualityIssue {
            kind: QualityIssueKind::LackOfDiversity,
            severity: 2,
            recommended_action: "Restructure the query and consider multi-query expansion"
                .to_string(),
        });
    }

    let window = &token_sets[..token_sets.len().min(10)];
    let has_duplicates = (0..window.len()).any(|i| {
        ((i + 1)..window.len()).any(|j| jaccard(&window[i], &window[j]) > 0.9)
    });
    if has_duplicates {
        issues.push(QualityIssue {
            kind: QualityIssueKind::DuplicateResults,
            severity: 2,
            recommended_action: "Drop near-identical chunks before returning".to_string(),
        });
    }

    issues
}
