use std::sync::Arc;
use std::time::Duration;

use catena_core::testutil::{MockFetcher, MockProxySource};
use catena_core::{
    ChainEngine, CrawlError, FetchConfig, FetchService, NullStore, ProxyPool, ProxyPoolConfig,
    ProxyStatus,
};

use crate::integration::common::{detail_step, fast_config};

const PROXIES: [&str; 3] = [
    "http://10.0.0.1:8080",
    "socks5://10.0.0.2:1080",
    "http://10.0.0.3:3128",
];

#[tokio::test]
async fn retired_pool_recovers_with_second_chance() {
    let pool = ProxyPool::default().with_seed(11);
    pool.add(PROXIES);
    for proxy in PROXIES {
        pool.report_failure(proxy);
    }
    assert_eq!(pool.stats().available, 0);
    assert_eq!(pool.stats().failure_rate, 1.0);

    let picked = pool.acquire().await.unwrap();
    assert!(PROXIES.contains(&picked.as_str()));
    assert_eq!(pool.stats().failure_rate, 0.0);
    assert_eq!(pool.stats().untested, 3);
}

#[tokio::test]
async fn retirement_happens_at_threshold_one() {
    let pool = ProxyPool::default();
    pool.add(["http://10.0.0.1:8080"]);
    pool.report_failure("http://10.0.0.1:8080");
    let proxy = pool.get("http://10.0.0.1:8080").unwrap();
    assert_eq!(proxy.status, ProxyStatus::Failed);
    assert_eq!(proxy.consecutive_failures, 1);
}

#[tokio::test]
async fn sources_are_refetched_before_second_chance() {
    let source = MockProxySource::new(
        "fresh",
        vec![Ok(vec!["http://10.9.9.9:80".to_string()])],
    );
    let pool = ProxyPool::default().with_sources(vec![Arc::new(source.clone())]);
    pool.add(["http://10.0.0.1:8080"]);
    pool.report_failure("http://10.0.0.1:8080");

    assert_eq!(pool.acquire().await.unwrap(), "http://10.9.9.9:80");
    assert_eq!(source.call_count(), 1);
    // The retired proxy was not reset since the source produced a new one.
    assert_eq!(
        pool.get("http://10.0.0.1:8080").unwrap().status,
        ProxyStatus::Failed
    );
}

#[tokio::test]
async fn exhaustion_after_spent_second_chance_fails_fetch() {
    let pool = ProxyPool::new(ProxyPoolConfig::default());
    pool.add(["http://10.0.0.1:8080"]);
    let fetcher = MockFetcher::new().fail_proxy("http://10.0.0.1:8080");
    let config = FetchConfig::default()
        .with_max_retries(3)
        .with_retry_base_delay(Duration::ZERO)
        .with_max_retry_delay(Duration::ZERO);
    let service = FetchService::new(fetcher.clone(), config).with_proxy_pool(pool.clone());

    let result = service.fetch("https://a.test").await;

    // attempt 1 fails on the proxy, attempt 2 uses the second chance,
    // attempts 3 and 4 find the pool exhausted.
    assert!(!result.is_success());
    assert_eq!(result.attempts, 4);
    assert_eq!(fetcher.call_count(), 2);
    assert!(matches!(result.error, Some(CrawlError::ProxyExhausted)));
}

#[tokio::test]
async fn chain_survives_dead_proxies() {
    let pool = ProxyPool::default().with_seed(5);
    pool.add(PROXIES);
    let mut fetcher = MockFetcher::new();
    for proxy in &PROXIES[..2] {
        fetcher = fetcher.fail_proxy(proxy);
    }
    let mut config = fast_config();
    config.fetch.use_proxy = true;
    config.fetch.max_retries = 3;

    let engine = ChainEngine::new(vec![detail_step("detail")], config, fetcher, NullStore)
        .unwrap()
        .with_proxy_pool(pool.clone());
    let outcome = engine.run(["a", "b", "c", "d"]).await.unwrap();

    assert_eq!(outcome.stats.successful_requests, 4);
    assert_eq!(pool.healthy_addresses(), vec!["http://10.0.0.3:3128"]);
    let proxy_stats = outcome.stats.proxy.unwrap();
    assert_eq!(proxy_stats.healthy, 1);
    assert!(proxy_stats.failed <= 2);
}

#[tokio::test]
async fn chain_fetches_sources_when_pool_is_empty() {
    let source = MockProxySource::new("list", vec![Ok(vec!["http://10.0.0.7:80".to_string()])]);
    let pool = ProxyPool::default().with_sources(vec![Arc::new(source.clone())]);
    let fetcher = MockFetcher::new();
    let mut config = fast_config();
    config.fetch.use_proxy = true;

    let engine = ChainEngine::new(vec![detail_step("detail")], config, fetcher.clone(), NullStore)
        .unwrap()
        .with_proxy_pool(pool);
    engine.run(["a"]).await.unwrap();

    assert_eq!(source.call_count(), 1);
    assert_eq!(fetcher.calls()[0].1.as_deref(), Some("http://10.0.0.7:80"));
}
