//! Receiver-side signature verification against real deliveries.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use serde_json::json;
use wiremock::matchers::{header_exists, method};
use wiremock::{Mock, MockServer};

use courier_webhooks::crypto;
use courier_webhooks::models::Event;

async fn capture_server() -> (MockServer, CaptureResponder) {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(header_exists("x-webhook-signature"))
        .and(header_exists("x-webhook-timestamp"))
        .respond_with(capture.clone())
        .mount(&server)
        .await;
    (server, capture)
}

/// Test: A receiver holding the endpoint secret accepts the delivery; one
/// holding another endpoint's secret rejects it.
#[tokio::test]
async fn test_each_endpoint_signs_with_its_own_secret() {
    let (server, capture) = capture_server().await;
    let harness = Harness::new();
    harness
        .register_with_secret(&format!("{}/a", server.uri()), &["*"], SECRET_1)
        .await;
    harness
        .register_with_secret(&format!("{}/b", server.uri()), &["*"], SECRET_2)
        .await;

    let created = harness
        .dispatcher
        .submit_event(&Event::new("invoice.paid", json!({"amount": 10})))
        .await
        .unwrap();
    for delivery in &created {
        harness
            .drive_until_terminal(delivery.id, Duration::from_secs(5))
            .await;
    }

    let requests = capture.requests();
    assert_eq!(requests.len(), 2);
    let by_secret_1 = requests
        .iter()
        .filter(|r| verify_captured_signature(r, SECRET_1))
        .count();
    let by_secret_2 = requests
        .iter()
        .filter(|r| verify_captured_signature(r, SECRET_2))
        .count();
    assert_eq!(by_secret_1, 1);
    assert_eq!(by_secret_2, 1);
}

/// Test: Tampering with the body, the timestamp or the signature is detected.
#[tokio::test]
async fn test_tampered_request_fails_verification() {
    let (server, capture) = capture_server().await;
    let harness = Harness::new();
    harness.register(&server.uri(), &["*"]).await;

    let created = harness
        .dispatcher
        .submit_event(&Event::new("invoice.paid", json!({"amount": 10})))
        .await
        .unwrap();
    harness
        .drive_until_terminal(created[0].id, Duration::from_secs(5))
        .await;

    let request = &capture.requests()[0];
    let timestamp: i64 = request.header("x-webhook-timestamp").unwrap().parse().unwrap();
    let signature = request.header("x-webhook-signature").unwrap();
    assert!(signature.starts_with(crypto::SIGNATURE_PREFIX));
    assert!(crypto::verify(SECRET_1, &request.body, timestamp, signature));

    let tampered_body = br#"{"amount":1000}"#;
    assert!(!crypto::verify(SECRET_1, tampered_body, timestamp, signature));
    assert!(!crypto::verify(SECRET_1, &request.body, timestamp + 1, signature));

    let mut forged = signature.to_string();
    let last = forged.pop().unwrap();
    forged.push(if last == '0' { '1' } else { '0' });
    assert!(!crypto::verify(SECRET_1, &request.body, timestamp, &forged));
}

/// Test: Freshness check rejects a captured request replayed later.
#[tokio::test]
async fn test_replayed_request_is_stale() {
    let (server, capture) = capture_server().await;
    let harness = Harness::new();
    harness.register(&server.uri(), &["*"]).await;

    let created = harness
        .dispatcher
        .submit_event(&Event::new("invoice.paid", json!({})))
        .await
        .unwrap();
    harness
        .drive_until_terminal(created[0].id, Duration::from_secs(5))
        .await;

    let request = &capture.requests()[0];
    let timestamp: i64 = request.header("x-webhook-timestamp").unwrap().parse().unwrap();
    let signature = request.header("x-webhook-signature").unwrap();
    let now = Utc::now().timestamp();

    assert!(crypto::verify_fresh(
        SECRET_1,
        &request.body,
        timestamp,
        signature,
        now,
        crypto::DEFAULT_TOLERANCE_SECS,
    ));
    assert!(!crypto::verify_fresh(
        SECRET_1,
        &request.body,
        timestamp,
        signature,
        now + crypto::DEFAULT_TOLERANCE_SECS + 60,
        crypto::DEFAULT_TOLERANCE_SECS,
    ));
}

/// Test: Generated secrets are used for signing when none is supplied.
#[tokio::test]
async fn test_generated_secret_signs_deliveries() {
    let (server, capture) = capture_server().await;
    let harness = Harness::new();
    let endpoint = harness
        .dispatcher
        .registry()
        .register(courier_webhooks::models::NewEndpoint {
            url: server.uri(),
            event_types: vec!["invoice.*".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(endpoint.secret.starts_with(crypto::SECRET_PREFIX));

    let created = harness
        .dispatcher
        .submit_event(&Event::new("invoice.paid", json!({})))
        .await
        .unwrap();
    harness
        .drive_until_terminal(created[0].id, Duration::from_secs(5))
        .await;

    let request = &capture.requests()[0];
    assert!(verify_captured_signature(request, &endpoint.secret));
    assert!(!verify_captured_signature(request, SECRET_1));
}
