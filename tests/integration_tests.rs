//! Integration tests using wiremock to simulate the API.
//!
//! GOAWAY retries are not exercised end to end: a mock HTTP/1 server cannot
//! send an HTTP/2 GOAWAY frame, and `reqwest::Error` cannot be built by hand.

use cirrus::retry::TooManyRequestsCondition;
use cirrus::{Client, Error, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Volume {
    id: u64,
    label: String,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::default()
        .max_attempts(3)
        .wait_bounds(Duration::from_millis(1), Duration::from_millis(5))
}

fn client(server: &MockServer) -> Client {
    Client::builder()
        .base_url(format!("{}/v4", server.uri()))
        .unwrap()
        .token("secret")
        .unwrap()
        .retry_policy(fast_retries())
        .build()
        .unwrap()
}

/// Answers with `first` for the first `n` requests and `then` afterwards.
struct FailThenSucceed {
    attempts: Arc<AtomicUsize>,
    n: usize,
    first: ResponseTemplate,
    then: ResponseTemplate,
}

impl Respond for FailThenSucceed {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.n {
            self.first.clone()
        } else {
            self.then.clone()
        }
    }
}

fn api_error(reason: &str) -> serde_json::Value {
    json!({"errors": [{"reason": reason}]})
}

#[tokio::test]
async fn test_successful_get_request() {
    let server = MockServer::start().await;
    let volume = Volume {
        id: 1,
        label: "data".to_string(),
    };

    Mock::given(method("GET"))
        .and(path("/v4/volumes/1"))
        .and(header("Authorization", "Bearer secret"))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&volume))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).get::<Volume>("volumes/1").await.unwrap();

    assert_eq!(response.data, volume);
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let server = MockServer::start().await;
    let request = Volume {
        id: 0,
        label: "new".to_string(),
    };

    Mock::given(method("POST"))
        .and(path("/v4/volumes"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({"id": 0, "label": "new"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "label": "new"})))
        .expect(1)
        .mount(&server)
        .await;

    let created = client(&server)
        .post::<_, Volume>("volumes", &request)
        .await
        .unwrap();
    assert_eq!(created.id, 9);
}

#[tokio::test]
async fn test_delete_with_empty_body() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v4/volumes/1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).delete("volumes/1").await.unwrap();
}

#[tokio::test]
async fn test_api_error_reasons_are_decoded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v4/volumes/1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [
                {"reason": "Label is invalid", "field": "label"},
                {"reason": "Size too small"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get::<Volume>("volumes/1").await.unwrap_err();

    match &err {
        Error::HttpError {
            status,
            message,
            reasons,
            ..
        } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(message, "[label] Label is invalid; Size too small");
            assert_eq!(reasons.len(), 2);
        }
        other => panic!("Expected HttpError, got {:?}", other),
    }
    assert_eq!(
        err.to_string(),
        "[400] [label] Label is invalid; Size too small"
    );
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(api_error("Not found")))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get::<Volume>("volumes/404").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_non_json_error_reports_content_type() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server)
        .await;

    let err = client(&server).get::<Volume>("volumes/1").await.unwrap_err();
    match err {
        Error::HttpError {
            status, message, ..
        } => {
            assert_eq!(status.as_u16(), 500);
            assert!(message.starts_with("Unexpected Content-Type"));
            assert!(message.ends_with("Response body: oops"));
        }
        other => panic!("Expected HttpError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_deserialization_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("invalid json"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get::<Volume>("volumes/1").await.unwrap_err();
    match err {
        Error::DeserializationFailed {
            raw_response,
            status,
            ..
        } => {
            assert_eq!(raw_response, "invalid json");
            assert_eq!(status.as_u16(), 200);
        }
        other => panic!("Expected DeserializationFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retries_exactly_max_attempts() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_json(api_error("Too many requests")))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).get::<Volume>("volumes/1").await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(429));
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    init_tracing();
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .respond_with(FailThenSucceed {
            attempts: attempts.clone(),
            n: 2,
            first: ResponseTemplate::new(503).set_body_json(api_error("Service unavailable")),
            then: ResponseTemplate::new(200).set_body_json(json!({"id": 1, "label": "data"})),
        })
        .mount(&server)
        .await;

    let response = client(&server).get::<Volume>("volumes/1").await.unwrap();

    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_busy_resource_is_retried() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .respond_with(FailThenSucceed {
            attempts: attempts.clone(),
            n: 1,
            first: ResponseTemplate::new(400).set_body_json(api_error("Linode busy.")),
            then: ResponseTemplate::new(200).set_body_json(json!({"id": 1, "label": "data"})),
        })
        .mount(&server)
        .await;

    let response = client(&server)
        .post::<_, Volume>("linode/instances/1/boot", &json!({}))
        .await
        .unwrap();
    assert_eq!(response.attempts, 2);
}

#[tokio::test]
async fn test_bad_gateway_is_retried() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .respond_with(FailThenSucceed {
            attempts: attempts.clone(),
            n: 1,
            first: ResponseTemplate::new(502).set_body_json(api_error("Bad gateway")),
            then: ResponseTemplate::new(200).set_body_json(json!({"id": 1, "label": "data"})),
        })
        .mount(&server)
        .await;

    let response = client(&server).get::<Volume>("volumes/1").await.unwrap();
    assert_eq!(response.attempts, 2);
}

#[tokio::test]
async fn test_non_json_bad_gateway_uses_status_text() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(502).set_body_raw("<html>502 Bad Gateway</html>", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();

    let err = client.get::<Volume>("volumes/1").await.unwrap_err();
    match err {
        Error::HttpError {
            status, message, ..
        } => {
            assert_eq!(status.as_u16(), 502);
            assert_eq!(message, "Bad Gateway");
        }
        other => panic!("Expected HttpError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_nginx_html_bad_request_is_retried() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .respond_with(FailThenSucceed {
            attempts: attempts.clone(),
            n: 1,
            first: ResponseTemplate::new(400)
                .insert_header("Server", "nginx")
                .set_body_raw("<html>400 Bad Request</html>", "text/html"),
            then: ResponseTemplate::new(200).set_body_json(json!({"id": 1, "label": "data"})),
        })
        .mount(&server)
        .await;

    let response = client(&server).get::<Volume>("volumes/1").await.unwrap();
    assert_eq!(response.attempts, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_html_bad_request_without_nginx_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(400).set_body_raw("<html>400 Bad Request</html>", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get::<Volume>("volumes/1").await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(400));
}

#[tokio::test]
async fn test_maintenance_mode_is_never_retried() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("X-Maintenance-Mode", "Scheduled upgrade")
                .set_body_json(api_error("Service unavailable")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get::<Volume>("volumes/1").await.unwrap_err();
    match err {
        Error::MaintenanceMode { status, message, .. } => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(message, "Scheduled upgrade");
        }
        other => panic!("Expected MaintenanceMode, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_after_is_respected() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .respond_with(FailThenSucceed {
            attempts: attempts.clone(),
            n: 1,
            first: ResponseTemplate::new(429)
                .insert_header("Retry-After", "1")
                .set_body_json(api_error("Too many requests")),
            then: ResponseTemplate::new(200).set_body_json(json!({"id": 1, "label": "data"})),
        })
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .retry_policy(
            RetryPolicy::none()
                .with_condition(TooManyRequestsCondition)
                .wait_bounds(Duration::from_millis(1), Duration::from_secs(5)),
        )
        .build()
        .unwrap();

    let start = Instant::now();
    let response = client.get::<Volume>("volumes/1").await.unwrap();

    assert_eq!(response.attempts, 2);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_custom_condition() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .respond_with(FailThenSucceed {
            attempts: attempts.clone(),
            n: 1,
            first: ResponseTemplate::new(409).set_body_json(api_error("Conflict")),
            then: ResponseTemplate::new(200).set_body_json(json!({"id": 1, "label": "data"})),
        })
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .retry_policy(fast_retries().with_condition(|e: &Error| e.has_status_code(&[409])))
        .build()
        .unwrap();

    let response = client.get::<Volume>("volumes/1").await.unwrap();
    assert_eq!(response.attempts, 2);
}

#[tokio::test]
async fn test_no_retry_policy() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_json(api_error("Service unavailable")))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();

    let err = client.get::<Volume>("volumes/1").await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_request_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 1, "label": "data"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .timeout(Duration::from_millis(50))
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();

    let err = client.get::<Volume>("volumes/1").await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
}
