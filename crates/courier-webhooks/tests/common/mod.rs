//! Common test utilities for courier-webhooks integration tests.
//!
//! Provides mock server responders, an in-memory dispatcher harness and
//! helpers for driving deliveries to completion.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use courier_webhooks::models::{Delivery, Endpoint, NewEndpoint};
use courier_webhooks::{
    Dispatcher, DispatcherConfig, InMemoryStore, RegistryConfig, RetryPolicy, Stores,
};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const SECRET_1: &str = "whsec_test_secret_key_12345";
pub const SECRET_2: &str = "whsec_another_secret_67890";

/// Retry policy with millisecond delays and no jitter.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(10)
        .with_base_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(1))
        .with_jitter(0.0)
}

/// Registry policy that accepts the mock server's `http://127.0.0.1` URLs.
pub fn local_registry_config() -> RegistryConfig {
    RegistryConfig::new()
        .with_allow_http(true)
        .with_allow_private_hosts(true)
}

pub fn test_dispatcher_config() -> DispatcherConfig {
    DispatcherConfig::new()
        .with_request_timeout(Duration::from_secs(2))
        .with_retry_policy(fast_retry_policy())
}

/// In-memory store plus a dispatcher over it.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_dispatcher_config())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Dispatcher::new(
            Stores::shared(store.clone()),
            local_registry_config(),
            config,
        )
        .expect("dispatcher");
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Register an endpoint with a fixed secret.
    pub async fn register(&self, url: &str, event_types: &[&str]) -> Endpoint {
        self.register_with_secret(url, event_types, SECRET_1).await
    }

    pub async fn register_with_secret(
        &self,
        url: &str,
        event_types: &[&str],
        secret: &str,
    ) -> Endpoint {
        self.dispatcher
            .registry()
            .register(NewEndpoint {
                url: url.to_string(),
                event_types: event_types.iter().map(|s| (*s).to_string()).collect(),
                secret: Some(secret.to_string()),
                description: None,
            })
            .await
            .expect("register endpoint")
    }

    pub async fn delivery(&self, id: Uuid) -> Delivery {
        self.dispatcher
            .queue()
            .find_delivery(id)
            .await
            .expect("find delivery")
            .expect("delivery exists")
    }

    /// Run the dispatcher until the delivery reaches a terminal status.
    pub async fn drive_until_terminal(&self, id: Uuid, limit: Duration) -> Delivery {
        let started = Instant::now();
        loop {
            self.dispatcher.run_once().await.expect("run_once");
            let delivery = self.delivery(id).await;
            if delivery.reported_status().is_terminal() {
                return delivery;
            }
            assert!(
                started.elapsed() < limit,
                "delivery {id} not terminal after {limit:?}: {:?}",
                delivery.reported_status()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("courier_webhooks=debug,webhook_delivery=debug")
        .try_init();
}

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    /// Parse the body as JSON.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    /// Create a new capture responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a capture responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
            timestamp: Utc::now(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// CountingResponder - counts requests
// ---------------------------------------------------------------------------

/// A wiremock responder that counts incoming requests.
#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
}

impl CountingResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: status,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that fails a specified number of times before succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
    success_code: u16,
}

impl FailingResponder {
    /// Fail `n` times with 500, then return 200.
    pub fn fail_times(n: u32) -> Self {
        Self::fail_with_status(n, 500)
    }

    pub fn fail_with_status(n: u32, failure_code: u16) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code,
            success_code: 200,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(self.success_code)
        }
    }
}

// ---------------------------------------------------------------------------
// DelayedResponder - adds response delay
// ---------------------------------------------------------------------------

/// A wiremock responder that adds a delay before responding.
#[derive(Clone)]
pub struct DelayedResponder {
    delay_ms: u64,
    response_code: u16,
    count: Arc<AtomicU32>,
}

impl DelayedResponder {
    pub fn new(delay_ms: u64) -> Self {
        Self::with_status(delay_ms, 200)
    }

    pub fn with_status(delay_ms: u64, response_code: u16) -> Self {
        Self {
            delay_ms,
            response_code,
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
            .set_delay(Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// Helper functions for signature verification
// ---------------------------------------------------------------------------

/// Independent HMAC-SHA256 over `{timestamp}.{body}`.
pub fn compute_test_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Verify a webhook signature from a captured request.
pub fn verify_captured_signature(request: &CapturedRequest, secret: &str) -> bool {
    let Some(signature_header) = request.header("x-webhook-signature") else {
        return false;
    };
    let Some(timestamp) = request.header("x-webhook-timestamp") else {
        return false;
    };

    let expected = format!(
        "sha256={}",
        compute_test_signature(secret, timestamp, &request.body)
    );
    signature_header == expected
}
