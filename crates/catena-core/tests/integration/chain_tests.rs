use catena_core::testutil::{MemoryStore, MockFetcher, RecordingReporter};
use catena_core::{ChainEngine, ChainState, CrawlError, NullStore, ProxyPool};
use serde_json::json;

use crate::integration::common::{detail_step, fast_config, link_step};

#[tokio::test]
async fn two_step_chain_dedups_next_frontier() {
    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let engine = ChainEngine::new(
        vec![link_step("list", vec![("A", vec!["B", "B", "C"])]), detail_step("detail")],
        fast_config(),
        fetcher.clone(),
        store.clone(),
    )
    .unwrap();

    let outcome = engine.run(["A"]).await.unwrap();

    assert_eq!(outcome.state, ChainState::Completed);
    let urls: Vec<_> = outcome.records.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["B", "C"]);
    assert_eq!(outcome.records[0].data, json!({ "url": "B", "body": "<html><body>B</body></html>" }));
    assert_eq!(outcome.stats.total_requests, 3);
    assert_eq!(outcome.stats.successful_requests, 3);
    assert_eq!(outcome.stats.failed_requests, 0);
    assert_eq!(outcome.stats.final_results, 2);
    assert_eq!(outcome.stats.steps_completed, 2);
    assert_eq!(outcome.stats.step_stats["list"].next_urls_discovered, Some(3));
    assert_eq!(outcome.stats.step_stats["detail"].next_urls_discovered, None);
    assert_eq!(fetcher.calls_for("B"), 1);

    assert_eq!(store.saved_urls(), vec!["B", "C"]);
    assert_eq!(store.finalize_count(), 1);
}

#[tokio::test]
async fn cap_keeps_first_distinct_urls_in_extraction_order() {
    let store = MemoryStore::new();
    let engine = ChainEngine::new(
        vec![
            link_step("list", vec![("A", vec!["D", "B", "D", "C", "E"])]),
            detail_step("detail"),
        ],
        fast_config().with_max_urls_per_step(2),
        MockFetcher::new(),
        store.clone(),
    )
    .unwrap();

    let outcome = engine.run(["A"]).await.unwrap();
    let urls: Vec<_> = outcome.records.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["D", "B"]);
    assert_eq!(outcome.stats.total_requests, 3);
}

#[tokio::test]
async fn cap_applies_to_initial_frontier() {
    let fetcher = MockFetcher::new();
    let engine = ChainEngine::new(
        vec![detail_step("detail")],
        fast_config().with_max_urls_per_step(2),
        fetcher.clone(),
        NullStore,
    )
    .unwrap();

    let outcome = engine.run(["a", "a", "b", "c"]).await.unwrap();
    assert_eq!(outcome.stats.total_requests, 2);
    assert_eq!(fetcher.call_count(), 2);
}

#[tokio::test]
async fn frontier_never_repeats_across_a_step() {
    let fetcher = MockFetcher::new();
    let engine = ChainEngine::new(
        vec![
            link_step("a", vec![("root", vec!["x", "y"])]),
            link_step("b", vec![("x", vec!["z", "w"]), ("y", vec!["w", "z"])]),
            detail_step("c"),
        ],
        fast_config(),
        fetcher.clone(),
        NullStore,
    )
    .unwrap();

    let outcome = engine.run(["root"]).await.unwrap();
    assert_eq!(outcome.stats.step_stats["c"].urls_processed, 2);
    assert_eq!(fetcher.calls_for("w"), 1);
    assert_eq!(fetcher.calls_for("z"), 1);
    assert_eq!(outcome.stats.total_requests, 5);
}

#[tokio::test]
async fn empty_next_frontier_ends_chain_early() {
    let store = MemoryStore::new();
    let reporter = RecordingReporter::new();
    let fetcher = MockFetcher::new();
    let engine = ChainEngine::new(
        vec![
            link_step("list", vec![("A", vec![])]),
            detail_step("detail"),
        ],
        fast_config(),
        fetcher.clone(),
        store.clone(),
    )
    .unwrap()
    .with_reporter(reporter.clone());

    let outcome = engine.run(["A"]).await.unwrap();

    assert_eq!(outcome.state, ChainState::Completed);
    assert_eq!(outcome.stats.steps_completed, 1);
    assert!(!outcome.stats.step_stats.contains_key("detail"));
    // The listing page is not a final result.
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.stats.final_results, 0);
    assert!(store.saved_urls().is_empty());
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(reporter.count("step_started"), 1);
    assert_eq!(reporter.count("chain_completed"), 1);
    assert!(store.is_finalized());
}

#[tokio::test]
async fn early_stop_in_middle_step_stores_nothing() {
    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let engine = ChainEngine::new(
        vec![
            link_step("category", vec![("A", vec!["P1", "P2"])]),
            link_step("product", vec![("P1", vec![]), ("P2", vec![])]),
            detail_step("detail"),
        ],
        fast_config(),
        fetcher.clone(),
        store.clone(),
    )
    .unwrap();

    let outcome = engine.run(["A"]).await.unwrap();

    assert_eq!(outcome.state, ChainState::Completed);
    assert_eq!(outcome.stats.steps_completed, 2);
    assert_eq!(outcome.stats.total_requests, 3);
    assert_eq!(outcome.stats.final_results, 0);
    assert!(outcome.records.is_empty());
    assert!(store.saved_urls().is_empty());
    assert_eq!(store.finalize_count(), 1);
}

#[tokio::test]
async fn blank_extracted_urls_are_counted() {
    let reporter = RecordingReporter::new();
    let fetcher = MockFetcher::new();
    let engine = ChainEngine::new(
        vec![link_step("list", vec![("A", vec!["", "B", "  "])]), detail_step("detail")],
        fast_config(),
        fetcher.clone(),
        NullStore,
    )
    .unwrap()
    .with_reporter(reporter.clone());

    let outcome = engine.run(["A"]).await.unwrap();
    assert_eq!(outcome.stats.step_stats["list"].next_urls_discovered, Some(3));
    assert_eq!(outcome.stats.step_stats["detail"].urls_processed, 1);
    assert_eq!(reporter.blank_urls(), 2);
}

#[tokio::test]
async fn per_url_failures_do_not_abort_the_chain() {
    let fetcher = MockFetcher::new().fail_url("B");
    let reporter = RecordingReporter::new();
    let engine = ChainEngine::new(
        vec![link_step("list", vec![("A", vec!["B", "C"])]), detail_step("detail")],
        fast_config(),
        fetcher.clone(),
        NullStore,
    )
    .unwrap()
    .with_reporter(reporter.clone());

    let outcome = engine.run(["A"]).await.unwrap();

    assert_eq!(outcome.state, ChainState::Completed);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.stats.total_requests, 3);
    assert_eq!(outcome.stats.successful_requests, 2);
    assert_eq!(outcome.stats.failed_requests, 1);
    assert_eq!(outcome.stats.step_stats["detail"].urls_failed, 1);
    // max_retries = 1 in the fast config
    assert_eq!(fetcher.calls_for("B"), 2);
    assert_eq!(reporter.failed_urls(), vec!["B"]);
}

#[tokio::test]
async fn parse_failure_is_a_successful_request_but_failed_url() {
    let engine = ChainEngine::new(
        vec![catena_core::ChainStep::new("only", |url, _| {
            if url == "bad" {
                Err(CrawlError::ParseError("missing price".into()))
            } else {
                Ok(json!({ "url": url }))
            }
        })],
        fast_config(),
        MockFetcher::new(),
        NullStore,
    )
    .unwrap();

    let outcome = engine.run(["good", "bad"]).await.unwrap();
    assert_eq!(outcome.stats.successful_requests, 2);
    assert_eq!(outcome.stats.failed_requests, 0);
    assert_eq!(outcome.stats.step_stats["only"].parse_failures, 1);
    assert_eq!(outcome.stats.final_results, 1);
}

#[tokio::test]
async fn storage_save_failures_are_counted_not_raised() {
    let store = MemoryStore::new().fail_save("b");
    let engine = ChainEngine::new(
        vec![detail_step("detail")],
        fast_config(),
        MockFetcher::new(),
        store.clone(),
    )
    .unwrap();

    let outcome = engine.run(["a", "b"]).await.unwrap();
    assert_eq!(outcome.stats.storage_failures, 1);
    assert_eq!(store.saved_urls(), vec!["a"]);
}

#[tokio::test]
async fn storage_finalize_failure_surfaces() {
    let engine = ChainEngine::new(
        vec![detail_step("detail")],
        fast_config(),
        MockFetcher::new(),
        MemoryStore::new().failing_finalize(),
    )
    .unwrap();

    let result = engine.run(["a"]).await;
    assert!(matches!(result, Err(CrawlError::StorageError(_))));
}

#[tokio::test]
async fn empty_pool_falls_back_to_direct_fetching() {
    let fetcher = MockFetcher::new();
    let reporter = RecordingReporter::new();
    let mut config = fast_config();
    config.fetch.use_proxy = true;
    let engine = ChainEngine::new(vec![detail_step("detail")], config, fetcher.clone(), NullStore)
        .unwrap()
        .with_proxy_pool(ProxyPool::default())
        .with_reporter(reporter.clone());

    let outcome = engine.run(["a"]).await.unwrap();
    assert_eq!(outcome.stats.successful_requests, 1);
    assert_eq!(fetcher.calls()[0].1, None);
    assert_eq!(reporter.count("proxies_unavailable"), 1);
}

#[tokio::test]
async fn requests_go_through_the_pool() {
    let fetcher = MockFetcher::new();
    let pool = ProxyPool::default().with_seed(9);
    pool.add(["http://10.0.0.1:8080"]);
    let mut config = fast_config();
    config.fetch.use_proxy = true;
    let engine = ChainEngine::new(vec![detail_step("detail")], config, fetcher.clone(), NullStore)
        .unwrap()
        .with_proxy_pool(pool.clone());

    let outcome = engine.run(["a", "b"]).await.unwrap();
    assert!(
        fetcher
            .calls()
            .iter()
            .all(|(_, proxy)| proxy.as_deref() == Some("http://10.0.0.1:8080"))
    );
    let proxy_stats = outcome.stats.proxy.unwrap();
    assert_eq!(proxy_stats.healthy, 1);
    assert_eq!(pool.healthy_addresses(), vec!["http://10.0.0.1:8080"]);
}
