//! Integration tests for the HTTP feed source and webhook notifier using wiremock

use std::time::Duration;

use feedwarden::fetcher::{
    FeedSource, FetchError, JsonFeedSource, Notifier, NotifyError, WebhookConfig, WebhookNotifier,
};
use feedwarden::models::{CacheValidators, FetchOutcome};
use feedwarden::script::FeedDecl;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED_BODY: &str = r#"{
    "version": "https://jsonfeed.org/version/1.1",
    "title": "Example",
    "items": [
        {"id": "a", "url": "https://example.com/a", "title": "A",
         "date_published": "2024-06-01T12:00:00Z"}
    ]
}"#;

fn source() -> JsonFeedSource {
    JsonFeedSource::new(Duration::from_secs(5), feedwarden::USER_AGENT).unwrap()
}

fn feed(server: &MockServer) -> FeedDecl {
    FeedDecl::new(format!("{}/feed.json", server.uri()))
}

// ============================================================================
// JSON Feed Source
// ============================================================================

/// Test successful fetch, with validators captured from the response
#[tokio::test]
async fn test_fetch_items() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"abc\"")
                .insert_header("last-modified", "Sat, 01 Jun 2024 12:00:00 GMT")
                .set_body_string(FEED_BODY),
        )
        .mount(&server)
        .await;

    let outcome = source()
        .fetch(&feed(&server), &CacheValidators::default())
        .await
        .unwrap();

    match outcome {
        FetchOutcome::Items { items, validators } => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].key(), "a");
            assert_eq!(validators.etag.as_deref(), Some("\"abc\""));
            assert_eq!(
                validators.last_modified.as_deref(),
                Some("Sat, 01 Jun 2024 12:00:00 GMT")
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// Test that remembered validators are sent and a 304 is reported as such
#[tokio::test]
async fn test_conditional_request_not_modified() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .and(header("if-none-match", "\"abc\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let validators = CacheValidators {
        etag: Some("\"abc\"".into()),
        last_modified: Some("Sat, 01 Jun 2024 12:00:00 GMT".into()),
    };
    let outcome = source().fetch(&feed(&server), &validators).await.unwrap();
    assert_eq!(outcome, FetchOutcome::NotModified);

    let requests = server.received_requests().await.unwrap();
    let since = requests[0].headers.get("if-modified-since").unwrap();
    assert_eq!(since.to_str().unwrap(), "Sat, 01 Jun 2024 12:00:00 GMT");
}

/// Test that a non-200 status carries the response body
#[tokio::test]
async fn test_fetch_status_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = source()
        .fetch(&feed(&server), &CacheValidators::default())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "want 200, got 503: maintenance");
    assert!(err.is_recoverable());
}

/// Test that a body that is not a JSON Feed is a decode error
#[tokio::test]
async fn test_fetch_undecodable_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<rss></rss>"))
        .mount(&server)
        .await;

    let err = source()
        .fetch(&feed(&server), &CacheValidators::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));
}

// ============================================================================
// Webhook Notifier
// ============================================================================

fn notifier(server: &MockServer, retries: u32) -> WebhookNotifier {
    let config = WebhookConfig::new(format!("{}/hook", server.uri()))
        .with_auth_token("secret")
        .with_max_retries(retries);
    WebhookNotifier::new(config)
        .unwrap()
        .with_backoff_base(Duration::from_millis(5))
}

/// Test that an item is posted as JSON with the bearer token
#[tokio::test]
async fn test_webhook_item_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(serde_json::json!({
            "kind": "item",
            "feed": {"url": "https://example.com/feed.json"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let items = JsonFeedSource::parse(FEED_BODY.as_bytes()).unwrap();
    notifier(&server, 0)
        .send_item(&FeedDecl::new("https://example.com/feed.json"), &items[0])
        .await
        .unwrap();
}

/// Test that server errors are retried
#[tokio::test]
async fn test_webhook_retries_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(serde_json::json!({"kind": "error"})))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    notifier(&server, 2).send_error("boom").await.unwrap();
}

/// Test that client errors are not retried
#[tokio::test]
async fn test_webhook_client_error_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .expect(1)
        .mount(&server)
        .await;

    let err = notifier(&server, 3).send_error("boom").await.unwrap_err();
    match err {
        NotifyError::Rejected { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad token");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
