//! End-to-end orchestrator tests over the in-memory mock backends

use std::sync::Arc;
use std::time::Duration;

use adaptive_rag::core::mock_providers::{
    FailingVectorStore, MockContextExpander, MockEmbedder, MockReranker, MockSemanticCache,
    MockSparseRetriever, MockTextCompletion, MockVectorStore,
};
use adaptive_rag::{
    AdaptiveSearchOrchestrator, FusionMethod, RagError, SearchOptions, SearchStrategy,
};
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

const CORPUS: &[(&str, &str, &str)] = &[
    ("c1", "d1", "tokio schedules async tasks across worker threads"),
    ("c2", "d1", "the tokio runtime parks idle worker threads to save cpu"),
    ("c3", "d2", "channels move messages between async tasks safely"),
    ("c4", "d2", "spawn blocking offloads cpu heavy work from the runtime"),
    ("c5", "d3", "select races multiple async branches and takes the first"),
    ("c6", "d3", "postgres replication streams write ahead log records"),
    ("c7", "d4", "mysql replication ships binlog events to replicas"),
    ("c8", "d4", "raft elects a leader before accepting writes"),
];

fn orchestrator() -> AdaptiveSearchOrchestrator {
    init_tracing();
    let embedder = Arc::new(MockEmbedder::new(128));
    let mut store = MockVectorStore::new(128);
    let mut sparse = MockSparseRetriever::new();
    for (chunk, doc, content) in CORPUS {
        store.index(chunk, doc, content, &embedder);
        sparse.index(chunk, doc, content);
    }
    AdaptiveSearchOrchestrator::new(embedder, Arc::new(store), Arc::new(sparse))
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let orchestrator = orchestrator();
    let err = orchestrator
        .search("  ", &SearchOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::InvalidInput { .. }));
}

#[tokio::test]
async fn repeated_query_is_served_from_cache_with_identical_payload() {
    let orchestrator = orchestrator();
    let options = SearchOptions::default();
    let cancel = CancellationToken::new();

    let first = orchestrator
        .search("tokio worker threads", &options, &cancel)
        .await
        .unwrap();
    assert!(!first.performance.cache_hit);

    let second = orchestrator
        .search("tokio worker threads", &options, &cancel)
        .await
        .unwrap();
    assert!(second.performance.cache_hit);
    assert_eq!(first.results, second.results);
    assert_eq!(first.used_strategy, second.used_strategy);
    assert_eq!(first.strategy_reasons, second.strategy_reasons);
}

#[tokio::test]
async fn cache_can_be_bypassed_per_call() {
    let orchestrator = orchestrator();
    let options = SearchOptions {
        use_cache: false,
        ..Default::default()
    };
    let cancel = CancellationToken::new();

    orchestrator
        .search("tokio worker threads", &options, &cancel)
        .await
        .unwrap();
    let second = orchestrator
        .search("tokio worker threads", &options, &cancel)
        .await
        .unwrap();
    assert!(!second.performance.cache_hit);
}

#[tokio::test]
async fn forced_strategy_overrides_selection() {
    let orchestrator = orchestrator();
    let options = SearchOptions {
        force_strategy: Some(SearchStrategy::KeywordOnly),
        ..Default::default()
    };
    let found = orchestrator
        .search("tokio worker threads", &options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(found.used_strategy, SearchStrategy::KeywordOnly);
    assert!(found.strategy_reasons[0].contains("forced"));
    // Keyword-only results carry sparse provenance exclusively.
    assert!(found
        .results
        .iter()
        .all(|r| r.sparse_score.is_some() && r.vector_score.is_none()));
}

#[tokio::test]
async fn comparative_query_takes_multi_query_path() {
    let orchestrator = orchestrator();
    let found = orchestrator
        .search(
            "postgres vs mysql replication",
            &SearchOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(found.used_strategy, SearchStrategy::MultiQuery);
    let ids: Vec<&str> = found.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert!(ids.contains(&"c6"));
    assert!(ids.contains(&"c7"));
}

#[tokio::test]
async fn simple_query_with_small_budget_goes_direct_vector() {
    let orchestrator = orchestrator();
    let options = SearchOptions {
        max_results: 3,
        ..Default::default()
    };
    let found = orchestrator
        .search("tokio runtime", &options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(found.used_strategy, SearchStrategy::DirectVector);
    assert!(found.results.len() <= 3);
}

#[tokio::test]
async fn vector_only_weights_preserve_vector_order() {
    let orchestrator = orchestrator();
    let hybrid = SearchOptions {
        force_strategy: Some(SearchStrategy::Hybrid),
        vector_weight: 1.0,
        sparse_weight: 0.0,
        use_cache: false,
        ..Default::default()
    };
    let direct = SearchOptions {
        force_strategy: Some(SearchStrategy::DirectVector),
        use_cache: false,
        ..Default::default()
    };
    let cancel = CancellationToken::new();

    let fused = orchestrator
        .search("async tasks channels", &hybrid, &cancel)
        .await
        .unwrap();
    let vector = orchestrator
        .search("async tasks channels", &direct, &cancel)
        .await
        .unwrap();

    let fused_ids: Vec<&str> = fused.results.iter().map(|r| r.chunk_id.as_str()).collect();
    let vector_ids: Vec<&str> = vector.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(fused_ids, vector_ids[..fused_ids.len()].to_vec());
}

#[tokio::test]
async fn max_results_is_honored_after_fusion() {
    let orchestrator = orchestrator();
    let options = SearchOptions {
        max_results: 2,
        force_strategy: Some(SearchStrategy::Hybrid),
        fusion_method: FusionMethod::WeightedSum,
        ..Default::default()
    };
    let found = orchestrator
        .search("async runtime tasks threads", &options, &CancellationToken::new())
        .await
        .unwrap();
    assert!(found.results.len() <= 2);
    for (idx, result) in found.results.iter().enumerate() {
        assert_eq!(result.fused_rank, idx + 1);
    }
}

#[tokio::test]
async fn reranker_reorders_before_final_truncation() {
    let cancel = CancellationToken::new();
    let options = SearchOptions {
        force_strategy: Some(SearchStrategy::Hybrid),
        use_cache: false,
        ..Default::default()
    };
    let baseline = orchestrator()
        .search("tokio worker threads", &options, &cancel)
        .await
        .unwrap();
    assert!(baseline.results.len() > 2);

    // The reversing reranker promotes the weakest fused candidate; plain
    // truncation to two results would have dropped it.
    let reranked = orchestrator()
        .with_reranker(Arc::new(MockReranker::new()))
        .search(
            "tokio worker threads",
            &SearchOptions {
                max_results: 2,
                ..options
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(reranked.results.len(), 2);
    assert_eq!(
        reranked.results[0].chunk_id,
        baseline.results.last().map(|c| c.chunk_id.clone()).unwrap()
    );
    for (idx, result) in reranked.results.iter().enumerate() {
        assert_eq!(result.fused_rank, idx + 1);
    }
}

#[tokio::test]
async fn two_stage_returns_expanded_context_when_configured() {
    let expander = MockContextExpander::new()
        .with_document("d1", "full text for d1 about tokio scheduling and parked workers")
        .with_document("d2", "full text for d2 about channels and blocking offload")
        .with_document("d3", "full text for d3 about select and shutdown")
        .with_document("d4", "full text for d4 about replication and raft");
    let orchestrator = orchestrator().with_context_expander(Arc::new(expander));
    let options = SearchOptions {
        force_strategy: Some(SearchStrategy::TwoStage),
        use_cache: false,
        ..Default::default()
    };
    let found = orchestrator
        .search("tokio worker threads", &options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(found.used_strategy, SearchStrategy::TwoStage);
    assert!(!found.results.is_empty());
    assert!(found.results.iter().all(|r| r.content.starts_with("full text for")));
    // No degradation reason when the expander is present.
    assert!(!found
        .strategy_reasons
        .iter()
        .any(|r| r.contains("unavailable")));
}

#[tokio::test]
async fn two_stage_without_expander_records_the_degradation() {
    let options = SearchOptions {
        force_strategy: Some(SearchStrategy::TwoStage),
        use_cache: false,
        ..Default::default()
    };
    let found = orchestrator()
        .search("tokio worker threads", &options, &CancellationToken::new())
        .await
        .unwrap();
    assert!(found
        .strategy_reasons
        .iter()
        .any(|r| r.contains("unavailable")));
    assert!(!found.results.is_empty());
}

#[tokio::test]
async fn hyde_and_step_back_record_their_heuristic_rewrites() {
    let orchestrator = orchestrator();
    let cancel = CancellationToken::new();

    let hyde = orchestrator
        .search(
            "how does tokio schedule tasks",
            &SearchOptions {
                force_strategy: Some(SearchStrategy::Hyde),
                use_cache: false,
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(hyde.used_strategy, SearchStrategy::Hyde);
    assert!(hyde
        .strategy_reasons
        .iter()
        .any(|r| r.contains("HyDE rewrite") && r.contains("explained in detail")));

    let step_back = orchestrator
        .search(
            "how does tokio schedule tasks",
            &SearchOptions {
                force_strategy: Some(SearchStrategy::StepBack),
                use_cache: false,
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(step_back.used_strategy, SearchStrategy::StepBack);
    assert!(step_back
        .strategy_reasons
        .iter()
        .any(|r| r.contains("Step-back rewrite") && r.contains("overview")));
}

#[tokio::test]
async fn hyde_prefers_the_completion_collaborator() {
    let completion = Arc::new(MockTextCompletion::with_response(
        "tokio schedules tasks on a work stealing runtime",
    ));
    let orchestrator = orchestrator().with_text_completion(completion);
    let found = orchestrator
        .search(
            "how does tokio schedule tasks",
            &SearchOptions {
                force_strategy: Some(SearchStrategy::Hyde),
                use_cache: false,
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(found
        .strategy_reasons
        .iter()
        .any(|r| r.contains("work stealing runtime")));
}

#[tokio::test]
async fn backend_failures_propagate_unchanged() {
    init_tracing();
    let embedder = Arc::new(MockEmbedder::new(128));
    let mut sparse = MockSparseRetriever::new();
    sparse.index("c1", "d1", "tokio schedules async tasks");
    let orchestrator = AdaptiveSearchOrchestrator::new(
        embedder,
        Arc::new(FailingVectorStore),
        Arc::new(sparse),
    );
    let err = orchestrator
        .search(
            "tokio tasks",
            &SearchOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    match err {
        RagError::Backend { collaborator, .. } => assert_eq!(collaborator, "vector-store"),
        other => panic!("expected backend error, got {other}"),
    }
}

#[tokio::test]
async fn pre_cancelled_token_aborts_before_backends_run() {
    let orchestrator = orchestrator();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = orchestrator
        .search("tokio tasks", &SearchOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Cancelled { .. }));
}

#[tokio::test]
async fn semantic_cache_is_consulted_and_populated() {
    let embedder = Arc::new(MockEmbedder::new(128));
    let mut store = MockVectorStore::new(128);
    let mut sparse = MockSparseRetriever::new();
    for (chunk, doc, content) in CORPUS {
        store.index(chunk, doc, content, &embedder);
        sparse.index(chunk, doc, content);
    }
    let cache = Arc::new(MockSemanticCache::new());
    let orchestrator =
        AdaptiveSearchOrchestrator::new(embedder, Arc::new(store), Arc::new(sparse))
            .with_semantic_cache(cache.clone());
    let cancel = CancellationToken::new();

    let first = orchestrator
        .search("tokio worker threads", &SearchOptions::default(), &cancel)
        .await
        .unwrap();
    assert!(!first.performance.cache_hit);

    // Short TTL on the exact-text cache forces the semantic layer to answer.
    let short_ttl = SearchOptions {
        cache_ttl: Duration::ZERO,
        ..Default::default()
    };
    orchestrator
        .search("tokio runtime cpu", &short_ttl, &cancel)
        .await
        .unwrap();
    let replay = orchestrator
        .search("tokio runtime cpu", &short_ttl, &cancel)
        .await
        .unwrap();
    assert!(replay.performance.cache_hit);
    assert!(replay
        .strategy_reasons
        .iter()
        .any(|r| r.contains("semantic cache")));
}

#[tokio::test]
async fn performance_report_tracks_executed_strategies() {
    let orchestrator = orchestrator();
    let cancel = CancellationToken::new();
    let options = SearchOptions {
        use_cache: false,
        ..Default::default()
    };

    orchestrator
        .search("tokio worker threads", &options, &cancel)
        .await
        .unwrap();
    orchestrator
        .search(
            "postgres vs mysql replication",
            &options,
            &cancel,
        )
        .await
        .unwrap();

    let report = orchestrator.performance_report();
    assert!(report.strategies.len() >= 2);
    assert!(report.best_strategy.is_some());
    assert!(report.strategies.iter().all(|s| s.executions >= 1));
}

#[tokio::test]
async fn strategy_reasons_are_never_empty() {
    let orchestrator = orchestrator();
    for query in [
        "tokio runtime",
        "why does raft elect a leader before accepting writes",
        "postgres vs mysql replication",
        "channels",
    ] {
        let found = orchestrator
            .search(
                query,
                &SearchOptions {
                    use_cache: false,
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!found.strategy_reasons.is_empty(), "no reasons for {query}");
    }
}
