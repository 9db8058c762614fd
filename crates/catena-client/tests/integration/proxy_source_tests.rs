use catena_client::HttpProxySource;
use catena_core::{CrawlError, ProxyPool, ProxySource};
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn http_source_parses_plain_list() {
    let server = MockServer::start().await;
    Mock::given(path("/socks5.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4:1080\n5.6.7.8:1080\n"))
        .mount(&server)
        .await;

    let source = HttpProxySource::new(format!("{}/socks5.txt", server.uri())).unwrap();
    let proxies = source.fetch().await.unwrap();
    assert_eq!(proxies, vec!["socks5://1.2.3.4:1080", "socks5://5.6.7.8:1080"]);
}

#[tokio::test]
async fn http_source_error_status() {
    let server = MockServer::start().await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = HttpProxySource::new(format!("{}/gone", server.uri())).unwrap();
    assert!(matches!(
        source.fetch().await,
        Err(CrawlError::HttpStatus { status: 503, .. })
    ));
}

#[tokio::test]
async fn pool_merges_sources_and_skips_failures() {
    let server = MockServer::start().await;
    Mock::given(path("/http.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "10.0.0.1:8080\nhttp://10.0.0.2:3128\n10.0.0.1:8080\n",
        ))
        .mount(&server)
        .await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sources = HttpProxySource::from_urls([
        format!("{}/http.txt", server.uri()),
        format!("{}/broken", server.uri()),
    ])
    .unwrap();
    let pool = ProxyPool::default().with_sources(sources);
    let report = pool.fetch().await;

    assert_eq!(report.sources_queried, 2);
    assert_eq!(report.sources_failed, 1);
    assert_eq!(report.added, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(pool.stats().untested, 2);
    assert_eq!(pool.source_names().len(), 2);
}

#[tokio::test]
async fn validation_probes_through_each_proxy() {
    let pool = ProxyPool::default();
    pool.add(["http://127.0.0.1:1"]);
    let fetcher = catena_client::ReqwestFetcher::new().unwrap();
    let report = pool
        .validate(
            &fetcher,
            "http://example.invalid/ip",
            4,
            std::time::Duration::from_secs(2),
        )
        .await;

    assert_eq!(report.total, 1);
    assert_eq!(report.working, 0);
    assert_eq!(pool.remove_failed(), 1);
    assert!(pool.is_empty());
}
