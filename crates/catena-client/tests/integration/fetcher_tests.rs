use std::time::Duration;

use catena_client::ReqwestFetcher;
use catena_core::testutil::MemoryStore;
use catena_core::{ChainConfig, ChainEngine, ChainStep, CrawlError, FetchConfig, Fetcher};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn fetches_body_with_browser_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header("x-team", "crawl"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>hello</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::builder().header("X-Team", "crawl").build().unwrap();
    let body = fetcher
        .fetch(&format!("{}/page", server.uri()), None)
        .await
        .unwrap();
    assert_eq!(body, "<p>hello</p>");
}

#[tokio::test]
async fn custom_user_agent_is_sent() {
    let server = MockServer::start().await;
    Mock::given(header("user-agent", "catena-test/0.1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::builder()
        .user_agent("catena-test/0.1")
        .build()
        .unwrap();
    assert_eq!(fetcher.fetch(&server.uri(), None).await.unwrap(), "ok");
}

#[tokio::test]
async fn error_status_maps_to_http_status() {
    let server = MockServer::start().await;
    Mock::given(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new().unwrap();
    let err = fetcher
        .fetch(&format!("{}/missing", server.uri()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::HttpStatus { status: 404, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn slow_response_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let err = fetcher
        .fetch(&format!("{}/slow", server.uri()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::Timeout(100)));
}

#[tokio::test]
async fn unreachable_proxy_is_a_network_error() {
    let fetcher = ReqwestFetcher::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let err = fetcher
        .fetch("http://example.invalid/", Some("http://127.0.0.1:1"))
        .await
        .unwrap_err();
    assert!(err.should_penalize_proxy());
}

#[tokio::test]
async fn chain_over_http_follows_links() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body><a href="{base}/item/1">1</a><a href="/item/2">2</a><a href="/item/1">1</a></body></html>"#
        )))
        .mount(&server)
        .await;
    for id in 1..=2 {
        Mock::given(path(format!("/item/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<html><head><title>Item {id}</title></head><body>item</body></html>"
            )))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = ChainConfig::default().with_fetch(
        FetchConfig::default()
            .with_max_retries(0)
            .with_proxy(false),
    );
    let store = MemoryStore::new();
    let engine = ChainEngine::new(
        vec![
            ChainStep::new("list", catena_client::collect_links)
                .with_extractor(catena_client::page_links),
            ChainStep::new("item", catena_client::summarize_html),
        ],
        config,
        ReqwestFetcher::new().unwrap(),
        store.clone(),
    )
    .unwrap();

    let outcome = engine.run([format!("{base}/list")]).await.unwrap();
    assert_eq!(outcome.stats.total_requests, 3);
    let titles: Vec<_> = outcome
        .records
        .iter()
        .map(|r| r.data["title"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(titles, vec!["Item 1", "Item 2"]);
    assert_eq!(store.saved().len(), 2);
}
