//! Crawl engine against a mock site
//!
//! These tests validate page order, failure tolerance and the pass counter.

mod common;

use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use krisha_scan::crawler::{CrawlEngine, EngineConfig, PageFetcher};
use krisha_scan::parser::{LineParser, SharedParser};

use common::fixed_clock;

fn line_parser() -> SharedParser {
    Arc::new(LineParser::new(fixed_clock()))
}

fn fast_engine(urls: Vec<String>, interval: Duration) -> CrawlEngine {
    CrawlEngine::new(
        urls,
        line_parser(),
        PageFetcher::with_timeout(Duration::from_secs(5)).unwrap(),
        EngineConfig::default()
            .with_interval(interval)
            .with_page_delay(Duration::from_millis(10)),
    )
}

async fn mount_page(server: &MockServer, page: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", page))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Test items arrive page by page, in page order
#[tokio::test]
async fn test_pages_fetched_in_order() {
    let server = MockServer::start().await;
    mount_page(&server, "1", "a\nb\n").await;
    mount_page(&server, "2", "c\n").await;

    let urls = vec![
        format!("{}/search?page=1", server.uri()),
        format!("{}/search?page=2", server.uri()),
    ];
    let engine = fast_engine(urls, Duration::from_secs(60));
    let mut stream = engine.start().unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let item = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .expect("item in time")
            .expect("stream open");
        ids.push(item.id);
    }
    assert_eq!(ids, vec!["a", "b", "c"]);

    engine.stop();
}

/// Test a failing page is skipped and the pass goes on
#[tokio::test]
async fn test_failing_page_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_page(&server, "2", "survivor\n").await;

    let urls = vec![
        format!("{}/search?page=1", server.uri()),
        format!("{}/search?page=2", server.uri()),
    ];
    let engine = fast_engine(urls, Duration::from_secs(60));
    let mut stream = engine.start().unwrap();

    let item = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("item in time")
        .expect("stream open");
    assert_eq!(item.id, "survivor");
    assert!(engine.is_running());

    engine.stop();
}

/// Test the loop keeps polling and counts passes
#[tokio::test]
async fn test_passes_repeat_on_interval() {
    let server = MockServer::start().await;
    mount_page(&server, "1", "same\n").await;

    let engine = fast_engine(
        vec![format!("{}/search?page=1", server.uri())],
        Duration::from_millis(50),
    );
    let mut stream = engine.start().unwrap();

    for _ in 0..3 {
        let item = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .expect("item in time")
            .expect("stream open");
        assert_eq!(item.id, "same");
    }
    assert!(engine.passes() >= 2);

    engine.stop();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while stream.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "Stream should close after stop");
    assert!(!engine.is_running());
}

/// Test an unreachable host does not end the loop
#[tokio::test]
async fn test_unreachable_host_keeps_running() {
    let engine = fast_engine(
        vec!["http://127.0.0.1:9/search?page=1".to_string()],
        Duration::from_millis(20),
    );
    let _stream = engine.start().unwrap();

    let ok = common::wait_until(Duration::from_secs(5), || {
        let passes = engine.passes();
        async move { passes >= 2 }
    })
    .await;
    assert!(ok, "Passes should keep completing");
    assert!(engine.is_running());

    engine.stop();
}
