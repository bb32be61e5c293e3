//! Orchestrator end to end: mock site, listing parser, in-memory store

mod common;

use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use krisha_scan::crawler::PageFetcher;
use krisha_scan::parser::{ListingParser, SharedParser};
use krisha_scan::scanner::{Orchestrator, ScanError};
use krisha_scan::storage::{MemoryStore, Persister, Store};
use krisha_scan::SubscriberKey;

use common::{
    fast_scan_config, fixed_clock, listing_card, listing_page, wait_until, RecordingNotifier,
};

struct Harness {
    orchestrator: Orchestrator,
    notifier: Arc<RecordingNotifier>,
    store: Arc<MemoryStore>,
    persister: Persister,
}

fn harness() -> Harness {
    let parser: SharedParser = Arc::new(ListingParser::new(fixed_clock()));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    let persister = Persister::new(Duration::from_secs(5));
    let orchestrator = Orchestrator::new(
        fast_scan_config(),
        parser,
        PageFetcher::with_timeout(Duration::from_secs(5)).unwrap(),
        store.clone(),
        persister.clone(),
        notifier.clone(),
    );
    Harness {
        orchestrator,
        notifier,
        store,
        persister,
    }
}

async fn mount_results(server: &MockServer, page: &str, cards: &[String]) {
    Mock::given(method("GET"))
        .and(path("/arenda/kvartiry/almaty/"))
        .and(query_param("page", page))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(cards)))
        .mount(server)
        .await;
}

fn filter(server: &MockServer) -> Url {
    Url::parse(&format!(
        "{}/arenda/kvartiry/almaty/?das[live.rooms]=2&page=4",
        server.uri()
    ))
    .unwrap()
}

/// Test every fresh listing is reported once across passes
#[tokio::test]
async fn test_new_listings_reported_once() {
    let server = MockServer::start().await;
    mount_results(
        &server,
        "1",
        &[
            listing_card("/a/show/100", "24 окт."),
            listing_card("/a/show/200", "23 окт."),
        ],
    )
    .await;
    mount_results(&server, "2", &[listing_card("/a/show/300", "24 окт.")]).await;

    let h = harness();
    let key = SubscriberKey::new("alice", -1001);
    let urls = Orchestrator::page_urls(&filter(&server), 2);
    h.orchestrator.register(&key, urls).await.unwrap();
    h.orchestrator.start(&key).await.unwrap();

    let reported = wait_until(Duration::from_secs(5), || {
        let count = h.notifier.items().len();
        async move { count >= 2 }
    })
    .await;
    assert!(reported);

    // Let a few more passes run over the same pages.
    let (orchestrator, key) = (&h.orchestrator, &key);
    let passed = wait_until(Duration::from_secs(5), || async move {
        orchestrator.passes(key).await.unwrap_or(0) >= 3
    })
    .await;
    assert!(passed);

    assert_eq!(h.notifier.items(), vec!["/a/show/100", "/a/show/300"]);
    assert_eq!(h.orchestrator.cached_items(key).await, Some(2));

    h.persister.drain(Duration::from_secs(5)).await;
    let mut members = h.store.get_set_members(&key.dedup_record()).await.unwrap();
    members.sort();
    assert_eq!(members, vec!["/a/show/100", "/a/show/300"]);

    h.orchestrator.unregister(key).await.unwrap();
}

/// Test listings persisted before a restart are not reported again
#[tokio::test]
async fn test_restart_does_not_repeat_listings() {
    let server = MockServer::start().await;
    mount_results(
        &server,
        "1",
        &[
            listing_card("/a/show/100", "24 окт."),
            listing_card("/a/show/300", "24 окт."),
        ],
    )
    .await;

    let h = harness();
    let key = SubscriberKey::new("bob", 42);
    h.store
        .add_set_members(&key.dedup_record(), &["/a/show/100".to_string()])
        .await
        .unwrap();

    let urls = Orchestrator::page_urls(&filter(&server), 1);
    h.orchestrator.register(&key, urls).await.unwrap();
    h.orchestrator.start(&key).await.unwrap();

    let reported = wait_until(Duration::from_secs(5), || {
        let count = h.notifier.items().len();
        async move { count >= 1 }
    })
    .await;
    assert!(reported);

    let (orchestrator, key) = (&h.orchestrator, &key);
    let passed = wait_until(Duration::from_secs(5), || async move {
        orchestrator.passes(key).await.unwrap_or(0) >= 2
    })
    .await;
    assert!(passed);
    assert_eq!(h.notifier.items(), vec!["/a/show/300"]);

    h.orchestrator.unregister(key).await.unwrap();
}

/// Test the per-key lifecycle errors
#[tokio::test]
async fn test_lifecycle_errors() {
    let h = harness();
    let key = SubscriberKey::new("carol", 7);
    let urls = vec!["http://127.0.0.1:9/?page=1".to_string()];

    assert!(matches!(
        h.orchestrator.start(&key).await,
        Err(ScanError::NotFound(_))
    ));
    h.orchestrator.register(&key, urls.clone()).await.unwrap();
    assert!(matches!(
        h.orchestrator.register(&key, urls).await,
        Err(ScanError::AlreadyExists(_))
    ));
    h.orchestrator.start(&key).await.unwrap();
    assert!(matches!(
        h.orchestrator.start(&key).await,
        Err(ScanError::AlreadyRunning(_))
    ));

    h.orchestrator.unregister(&key).await.unwrap();
    assert!(!h.orchestrator.exists(&key).await);
    assert!(matches!(
        h.orchestrator.unregister(&key).await,
        Err(ScanError::NotFound(_))
    ));
}

/// Test unregistering removes the durable dedup record
#[tokio::test]
async fn test_unregister_removes_dedup_record() {
    let h = harness();
    let key = SubscriberKey::new("dave", 8);
    h.store
        .add_set_members(&key.dedup_record(), &["/a/show/1".to_string()])
        .await
        .unwrap();

    h.orchestrator
        .register(&key, vec!["http://127.0.0.1:9/?page=1".to_string()])
        .await
        .unwrap();
    h.orchestrator.unregister(&key).await.unwrap();
    h.persister.drain(Duration::from_secs(5)).await;

    assert!(h
        .store
        .get_set_members(&key.dedup_record())
        .await
        .unwrap()
        .is_empty());
}
