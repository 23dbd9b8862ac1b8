//! Strategy performance ledger
//!
//! The orchestrator records one sample per executed search so callers can
//! inspect which strategies are paying off for their corpus.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::orchestrator::strategy::SearchStrategy;

/// One recorded strategy execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// When the sample was recorded
    pub recorded_at: DateTime<Utc>,
    /// Wall-clock execution time
    pub elapsed: Duration,
    /// Number of results the strategy produced
    pub result_count: usize,
}

/// Aggregated statistics for one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    /// Strategy these statistics describe
    pub strategy: SearchStrategy,
    /// Number of recorded executions
    pub executions: usize,
    /// Mean wall-clock latency across executions
    pub mean_latency: Duration,
    /// Mean result count across executions
    pub mean_result_count: f64,
}

/// Aggregate report over every strategy with recorded samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Per-strategy aggregates, in first-recorded order
    pub strategies: Vec<StrategyStats>,
    /// Best-performing strategy: highest mean result count, ties broken by
    /// lower mean latency
    pub best_strategy: Option<SearchStrategy>,
}

/// Thread-safe per-strategy sample ledger
///
/// Samples are appended under a short write lock after a search completes;
/// the lock never spans a suspension point.
#[derive(Debug, Default)]
pub struct PerformanceLedger {
    samples: RwLock<IndexMap<SearchStrategy, Vec<PerformanceSample>>>,
}

impl PerformanceLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one strategy execution
    pub fn record(&self, strategy: SearchStrategy, elapsed: Duration, result_count: usize) {
        let sample = PerformanceSample {
            recorded_at: Utc::now(),
            elapsed,
            result_count,
        };
        self.samples.write().entry(strategy).or_default().push(sample);
    }

    /// Build an aggregate report over all recorded samples
    pub fn report(&self) -> PerformanceReport {
        let samples = self.samples.read();
        let strategies: Vec<StrategyStats> = samples
            .iter()
            .map(|(strategy, runs)| {
                let total: Duration = runs.iter().map(|s| s.elapsed).sum();
                let results: usize = runs.iter().map(|s| s.result_count).sum();
                StrategyStats {
                    strategy: *strategy,
                    executions: runs.len(),
                    mean_latency: total / runs.len().max(1) as u32,
                    mean_result_count: results as f64 / runs.len().max(1) as f64,
                }
            })
            .collect();

        let best_strategy = strategies
            .iter()
            .max_by(|a, b| {
                a.mean_result_count
                    .partial_cmp(&b.mean_result_count)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.mean_latency.cmp(&a.mean_latency))
            })
            .map(|s| s.strategy);

        PerformanceReport {
            strategies,
            best_strategy,
        }
    }
}
