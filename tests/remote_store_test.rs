//! Integration tests for RemoteStore using wiremock
//!
//! These tests validate the admin API client against a mock server.

use std::time::Duration;

use feedwarden::error::ErrorCategory;
use feedwarden::storage::{
    ClientError, FeedState, RemoteConfig, RemoteStore, StateMap, Store, StoreError,
};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer) -> RemoteStore {
    let config = RemoteConfig::new(server.uri())
        .with_retry_count(2)
        .with_retry_delay(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(5));
    RemoteStore::new(config).unwrap()
}

/// Test reading all documents of a snapshot
#[tokio::test]
async fn test_load_snapshot() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/config"))
        .respond_with(ResponseTemplate::new(200).set_body_string("feed(url = \"https://a.example\")"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/state"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"https://a.example": {"disabled": true, "last_updated": "2024-06-01T12:00:00Z"}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/error-template"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Error: %v"))
        .mount(&server)
        .await;

    let snapshot = store(&server).load_snapshot().await.unwrap();

    assert_eq!(snapshot.config, "feed(url = \"https://a.example\")");
    assert!(snapshot.state["https://a.example"].disabled);
    assert_eq!(snapshot.error_template, "Error: %v");
}

/// Test that state is sent as JSON and the byte count reported
#[tokio::test]
async fn test_save_state() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/state"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut state = StateMap::new();
    state.insert("https://a.example".into(), FeedState::default());

    let written = store(&server).save_state(&state).await.unwrap();
    assert!(written > 0);

    let requests = server.received_requests().await.unwrap();
    let sent: StateMap = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent, state);
}

/// Test that a locked config surfaces as a conflict, without retries
#[tokio::test]
async fn test_config_conflict_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/config"))
        .and(body_string("feed(url = \"https://b.example\")"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "error": "cannot modify config: run is in progress"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = store(&server)
        .save_config(b"feed(url = \"https://b.example\")")
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Conflict);
    match err {
        StoreError::Remote(ClientError::HttpError { status, message }) => {
            assert_eq!(status, 409);
            assert_eq!(message, "cannot modify config: run is in progress");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Test that server errors trigger retries
#[tokio::test]
async fn test_server_error_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/error-template"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/error-template"))
        .respond_with(ResponseTemplate::new(200).set_body_string("retried: %v"))
        .mount(&server)
        .await;

    let template = store(&server).load_error_template().await.unwrap();
    assert_eq!(template, "retried: %v");
}

/// Test that retries give up after the configured count
#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/config"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = store(&server).load_config().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Network);
}

/// Test that a rejected document is a validation error
#[tokio::test]
async fn test_invalid_template_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/error-template"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid error template: not valid UTF-8"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = store(&server)
        .save_error_template(&[0xff, 0xfe])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
}

/// Test that an unparsable remote state is reported, not replaced by an empty map
#[tokio::test]
async fn test_malformed_remote_state() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/state"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let err = store(&server).load_state().await.unwrap_err();
    assert!(matches!(err, StoreError::Json { .. }));
}
