//! Query complexity analysis
//!
//! Classifies a raw query string into the structured [`QueryAnalysis`] every
//! downstream decision consumes. Analysis is deterministic, pure, and never
//! blocks on I/O: the same query always yields the same analysis.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Structural type of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKind {
    /// Bare keywords with no question structure
    SimpleKeyword,
    /// A natural-language question
    NaturalQuestion,
    /// A query comparing two or more things
    ComparisonQuery,
    /// A question requiring explanation or causal reasoning
    ReasoningQuery,
}

/// Ordered complexity tier
///
/// Ordering is meaningful: adding tokens or reasoning/comparison markers to
/// a query never lowers its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Complexity {
    /// Short keyword lookups
    Simple,
    /// Ordinary single-intent questions
    Moderate,
    /// Multi-clause or reasoning-flavored questions
    Complex,
    /// Long comparative/analytical questions
    VeryComplex,
}

/// Detected query script/language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    /// ASCII/Latin script only
    English,
    /// Hangul script only
    Korean,
    /// Both scripts present
    Mixed,
    /// Neither script recognized
    Other,
}

/// Immutable result of query classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// Structural type of the query
    pub kind: QueryKind,
    /// Complexity tier
    pub complexity: Complexity,
    /// Detected script/language
    pub language: Language,
    /// Deduplicated significant tokens, in order of first appearance
    pub keywords: Vec<String>,
    /// Recognized domain/technical concepts
    pub concepts: Vec<String>,
    /// How specific the query is (0.0 broad, 1.0 highly specific)
    pub specificity: f32,
    /// Whether the query compares two or more things
    pub has_comparative_context: bool,
    /// Whether the query asks for explanation or causal reasoning
    pub requires_reasoning: bool,
    /// Classifier confidence (0.0 to 1.0)
    pub confidence_score: f32,
    /// Rough processing-time estimate, monotonic in complexity
    pub estimated_processing_time: Duration,
}

/// Deterministic query classifier
#[derive(Debug)]
pub struct QueryAnalyzer {
    stop_words: HashSet<&'static str>,
    technical_terms: HashSet<&'static str>,
    interrogative_markers: Vec<&'static str>,
    reasoning_markers: Vec<&'static str>,
    comparison_markers: Vec<&'static str>,
}

impl QueryAnalyzer {
    /// Create an analyzer with the default marker vocabularies
    pub fn new() -> Self {
        Self {
            stop_words: [
                "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in",
                "is", "it", "its", "of", "on", "that", "the", "to", "was", "will", "with", "do",
                "does", "did", "can", "could", "should", "would",
            ]
            .into_iter()
            .collect(),
            technical_terms: [
                "algorithm", "api", "async", "cache", "compiler", "concurrency", "database",
                "embedding", "encryption", "index", "kernel", "latency", "protocol", "query",
                "runtime", "scheduler", "serialization", "shard", "throughput", "transaction",
                "vector", "tokenizer", "transformer", "gradient", "regression",
            ]
            .into_iter()
            .collect(),
            interrogative_markers: vec![
                "what", "why", "how", "who", "when", "where", "which", "무엇", "어떻게", "왜",
                "누구", "언제",
            ],
            reasoning_markers: vec![
                "why", "how", "explain", "reason", "because", "analyze", "cause", "왜", "어떻게",
                "이유",
            ],
            comparison_markers: vec![
                "vs", "versus", "compare", "comparison", "difference", "differences", "better",
                "차이", "비교",
            ],
        }
    }

    /// Classify a raw query string
    ///
    /// Empty or whitespace-only input is a defined edge case, not an error:
    /// it yields a `SimpleKeyword`/`Simple` analysis with full confidence.
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return QueryAnalysis {
                kind: QueryKind::SimpleKeyword,
                complexity: Complexity::Simple,
                language: Language::English,
                keywords: Vec::new(),
                concepts: Vec::new(),
                specificity: 0.0,
                has_comparative_context: false,
                requires_reasoning: false,
                confidence_score: 1.0,
                estimated_processing_time: estimated_time(Complexity::Simple),
            };
        }

        let tokens = tokenize(trimmed);
        let language = detect_language(&tokens);

        let lower = trimmed.to_lowercase();
        let has_question_mark = trimmed.ends_with('?');
        let interrogative = has_question_mark
            || self
                .interrogative_markers
                .iter()
                .any(|m| contains_marker(&lower, &tokens, m));
        let requires_reasoning = self
            .reasoning_markers
            .iter()
            .any(|m| contains_marker(&lower, &tokens, m));
        let has_comparative_context = self
            .comparison_markers
            .iter()
            .any(|m| contains_marker(&lower, &tokens, m));

        let kind = if has_comparative_context {
            QueryKind::ComparisonQuery
        } else if requires_reasoning {
            QueryKind::ReasoningQuery
        } else if interrogative {
            QueryKind::NaturalQuestion
        } else {
            QueryKind::SimpleKeyword
        };

        let mut seen = HashSet::new();
        let keywords: Vec<String> = tokens
            .iter()
            .filter(|t| !self.stop_words.contains(t.as_str()))
            .filter(|t| seen.insert((*t).clone()))
            .cloned()
            .collect();

        let concepts: Vec<String> = keywords
            .iter()
            .filter(|k| self.technical_terms.contains(k.as_str()))
            .cloned()
            .collect();

        let specificity = (0.05 * keywords.len() as f32).min(0.4)
            + (0.2 * concepts.len() as f32).min(0.6);

        // Monotonic complexity score: every contributing term is
        // non-negative, so more tokens or more markers can only raise it.
        let mut marker_score = 0.0;
        if requires_reasoning {
            marker_score += 0.9;
        }
        if has_comparative_context {
            marker_score += 0.7;
        }
        if interrogative {
            marker_score += 0.2;
        }
        let tech_density = if tokens.is_empty() {
            0.0
        } else {
            concepts.len() as f32 / tokens.len() as f32
        };
        let score = 0.08 * tokens.len() as f32 + marker_score + 0.5 * tech_density;
        let complexity = if score < 0.7 {
            Complexity::Simple
        } else if score < 1.3 {
            Complexity::Moderate
        } else if score < 2.0 {
            Complexity::Complex
        } else {
            Complexity::VeryComplex
        };

        let markers_matched = usize::from(interrogative)
            + usize::from(requires_reasoning)
            + usize::from(has_comparative_context);
        let confidence_score =
            (0.55 + 0.12 * markers_matched as f32 + 0.02 * tokens.len() as f32).min(1.0);

        QueryAnalysis {
            kind,
            complexity,
            language,
            keywords,
            concepts,
            specificity: specificity.min(1.0),
            has_comparative_context,
            requires_reasoning,
            confidence_score,
            estimated_processing_time: estimated_time(complexity),
        }
    }
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split into lowercase alphanumeric tokens (Hangul syllables included)
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn is_hangul(c: char) -> bool {
    matches!(c,
        '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}' | '\u{AC00}'..='\u{D7A3}')
}

fn detect_language(tokens: &[String]) -> Language {
    let korean = tokens.iter().filter(|t| t.chars().any(is_hangul)).count();
    let english = tokens
        .iter()
        .filter(|t| t.chars().any(|c| c.is_ascii_alphanumeric()))
        .count();
    match (korean, english) {
        (0, 0) => Language::Other,
        (0, _) => Language::English,
        (_, 0) => Language::Korean,
        _ => Language::Mixed,
    }
}

/// Marker matching: multi-word markers match as substrings, single-word
/// markers must match a whole token (so "how" does not fire on "show").
fn contains_marker(lower: &str, tokens: &[String], marker: &str) -> bool {
    if marker.contains(' ') {
        lower.contains(marker)
    } else {
        tokens.iter().any(|t| t == marker)
    }
}

fn estimated_time(complexity: Complexity) -> Duration {
    match complexity {
        Complexity::Simple => Duration::from_millis(50),
        Complexity::Moderate => Duration::from_millis(120),
        Complexity::Complex => Duration::from_millis(250),
        Complexity::VeryComplex => Duration::from_millis(500),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_a_defined_edge_case() {
        let analyzer = QueryAnalyzer::new();
        for query in ["", "   ", "\t\n"] {
            let analysis = analyzer.analyze(query);
            assert_eq!(analysis.kind, QueryKind::SimpleKeyword);
            assert_eq!(analysis.complexity, Complexity::Simple);
            assert_eq!(analysis.confidence_score, 1.0);
            assert!(analysis.keywords.is_empty());
        }
    }

    #[test]
    fn analysis_is_deterministic() {
        let analyzer = QueryAnalyzer::new();
        let query = "why is the tokio scheduler faster than a thread pool?";
        assert_eq!(analyzer.analyze(query), analyzer.analyze(query));
    }

    #[test]
    fn comparison_markers_win_over_question_markers() {
        let analyzer = QueryAnalyzer::new();
        let analysis = analyzer.analyze("what is the difference between BM25 and cosine?");
        assert_eq!(analysis.kind, QueryKind::ComparisonQuery);
        assert!(analysis.has_comparative_context);
    }

    #[test]
    fn reasoning_queries_are_flagged() {
        let analyzer = QueryAnalyzer::new();
        let analysis = analyzer.analyze("explain why the cache invalidation fails");
        assert_eq!(analysis.kind, QueryKind::ReasoningQuery);
        assert!(analysis.requires_reasoning);
    }

    #[test]
    fn complexity_is_monotonic_under_appended_markers() {
        let analyzer = QueryAnalyzer::new();
        let base = analyzer.analyze("rust memory model");
        let extended = analyzer.analyze("rust memory model why compare versus explain reason");
        assert!(extended.complexity >= base.complexity);
    }

    #[test]
    fn language_detection_covers_scripts() {
        let analyzer = QueryAnalyzer::new();
        assert_eq!(analyzer.analyze("tokio runtime").language, Language::English);
        assert_eq!(analyzer.analyze("러스트 메모리").language, Language::Korean);
        assert_eq!(analyzer.analyze("rust 차이 비교").language, Language::Mixed);
    }

    #[test]
    fn korean_interrogatives_are_recognized() {
        let analyzer = QueryAnalyzer::new();
        let analysis = analyzer.analyze("러스트 소유권은 무엇");
        assert_eq!(analysis.kind, QueryKind::NaturalQuestion);
    }

    #[test]
    fn technical_terms_raise_specificity() {
        let analyzer = QueryAnalyzer::new();
        let plain = analyzer.analyze("good places for lunch");
        let technical = analyzer.analyze("compiler scheduler latency tuning");
        assert!(technical.specificity > plain.specificity);
        assert!(!technical.concepts.is_empty());
    }

    #[test]
    fn processing_estimate_is_monotonic_in_complexity() {
        assert!(estimated_time(Complexity::Simple) < estimated_time(Complexity::Moderate));
        assert!(estimated_time(Complexity::Moderate) < estimated_time(Complexity::Complex));
        assert!(estimated_time(Complexity::Complex) < estimated_time(Complexity::VeryComplex));
    }

    #[test]
    fn marker_matching_requires_whole_tokens() {
        let analyzer = QueryAnalyzer::new();
        // "show" contains "how" but is not a question.
        let analysis = analyzer.analyze("show stopping performance numbers");
        assert_eq!(analysis.kind, QueryKind::SimpleKeyword);
    }
}
