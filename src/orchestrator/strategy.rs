//! Search strategy selection
//!
//! Maps a [`QueryAnalysis`] to one of the fixed strategies and explains the
//! choice. Selection is a pure function of the analysis and the per-call
//! options; a caller-forced strategy overrides it entirely.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::analysis::{Complexity, QueryAnalysis};

/// A search execution strategy
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum SearchStrategy {
    /// Vector similarity only, no sparse retrieval
    DirectVector,
    /// Concurrent vector + sparse retrieval with rank fusion
    Hybrid,
    /// Hybrid first pass, then small-to-big context expansion
    TwoStage,
    /// Several query paraphrases searched concurrently and merged
    MultiQuery,
    /// Hypothetical-answer rewrite, then hybrid
    Hyde,
    /// Generalizing step-back rewrite, then hybrid
    StepBack,
    /// Sparse keyword retrieval only, no vector search
    KeywordOnly,
}

/// Result budget under which a simple query takes the direct-vector path
const SMALL_BUDGET: usize = 5;

/// Pure strategy selector
#[derive(Debug, Default)]
pub struct StrategySelector;

impl StrategySelector {
    /// Select a strategy for `analysis`, honoring an explicit override
    ///
    /// Returns the strategy plus at least one human-readable reason.
    pub fn select(
        &self,
        analysis: &QueryAnalysis,
        max_results: usize,
        force: Option<SearchStrategy>,
    ) -> (SearchStrategy, Vec<String>) {
        if let Some(strategy) = force {
            return (
                strategy,
                vec![format!(
                    "Strategy {strategy} explicitly forced by caller, overriding analysis"
                )],
            );
        }

        if analysis.complexity == Complexity::Simple && max_results <= SMALL_BUDGET {
            return (
                SearchStrategy::DirectVector,
                vec![format!(
                    "Simple query with small result budget ({max_results}) suits direct vector search"
                )],
            );
        }

        if analysis.has_comparative_context {
            return (
                SearchStrategy::MultiQuery,
                vec![
                    "Comparative context detected; multiple paraphrases cover both sides"
                        .to_string(),
                ],
            );
        }

        if analysis.requires_reasoning {
            return (
                SearchStrategy::TwoStage,
                vec![
                    "Reasoning query benefits from context expansion around precise matches"
                        .to_string(),
                ],
            );
        }

        (
            SearchStrategy::Hybrid,
            vec![format!(
                "Default hybrid fusion for {:?} complexity query",
                analysis.complexity
            )],
        )
    }
}

/// Fixed alternative-strategy rotation used when refinement is disabled
///
/// DirectVector → Hybrid → TwoStage → MultiQuery → HyDE → StepBack → Hybrid.
pub fn next_in_rotation(current: SearchStrategy) -> SearchStrategy {
    match current {
        SearchStrategy::DirectVector => SearchStrategy::Hybrid,
        SearchStrategy::Hybrid => SearchStrategy::TwoStage,
        SearchStrategy::TwoStage => SearchStrategy::MultiQuery,
        SearchStrategy::MultiQuery => SearchStrategy::Hyde,
        SearchStrategy::Hyde => SearchStrategy::StepBack,
        SearchStrategy::StepBack => SearchStrategy::Hybrid,
        SearchStrategy::KeywordOnly => SearchStrategy::Hybrid,
    }
}
