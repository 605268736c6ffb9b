//! PostgreSQL-backed store tests.
//!
//! Require a running database:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/courier_test \
//!     cargo test -p courier-webhooks --features integration -- --test-threads=1
//! ```

#![cfg(feature = "integration")]

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

use courier_webhooks::models::{
    Delivery, DeliveryAttempt, DeliveryStatus, Event, NewEndpoint, TerminalStatus,
};
use courier_webhooks::{Dispatcher, PgStore, StorageError, Stores};

async fn pg_dispatcher() -> (Arc<PgStore>, Arc<Dispatcher>) {
    init_tracing();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = courier_db::connect(&url, 10).await.expect("connect");
    courier_db::run_migrations(&pool).await.expect("migrations");

    let store = Arc::new(PgStore::new(pool));
    let dispatcher = Dispatcher::new(
        Stores::shared(store.clone()),
        local_registry_config(),
        test_dispatcher_config(),
    )
    .expect("dispatcher");
    (store, Arc::new(dispatcher))
}

async fn register(dispatcher: &Dispatcher, url: &str, filter: &str) -> courier_webhooks::Endpoint {
    dispatcher
        .registry()
        .register(NewEndpoint {
            url: url.to_string(),
            event_types: vec![filter.to_string()],
            secret: Some(SECRET_1.to_string()),
            description: Some("integration".into()),
        })
        .await
        .expect("register")
}

/// Unique event type so parallel runs do not see each other's endpoints.
fn scoped_event_type() -> String {
    format!("it_{}.created", Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_endpoint_round_trip_and_toggle() {
    let (_store, dispatcher) = pg_dispatcher().await;
    let event_type = scoped_event_type();
    let endpoint = register(&dispatcher, "https://example.com/hook", &event_type).await;

    let found = dispatcher.registry().get(endpoint.id).await.unwrap();
    assert_eq!(found.url, endpoint.url);
    assert_eq!(found.secret, SECRET_1);
    assert!(found.enabled);

    dispatcher.registry().disable(endpoint.id).await.unwrap();
    assert!(dispatcher.registry().resolve(&event_type).await.unwrap().is_empty());

    dispatcher.registry().enable(endpoint.id).await.unwrap();
    let resolved = dispatcher.registry().resolve(&event_type).await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, endpoint.id);
}

#[tokio::test]
async fn test_enqueue_is_idempotent_per_event_and_endpoint() {
    let (_store, dispatcher) = pg_dispatcher().await;
    let event_type = scoped_event_type();
    let endpoint = register(&dispatcher, "https://example.com/hook", &event_type).await;

    let event = Event::new(event_type.as_str(), json!({"a": 1}));
    let first = dispatcher.submit_event(&event).await.unwrap();
    let second = dispatcher.submit_event(&event).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());

    let stored = dispatcher
        .queue()
        .find_delivery_for(event.id, endpoint.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, first[0].id);
    assert_eq!(stored.payload, json!({"a": 1}));
    assert_eq!(stored.reported_status(), DeliveryStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_claims_do_not_overlap() {
    let (store, dispatcher) = pg_dispatcher().await;
    let event_type = scoped_event_type();
    register(&dispatcher, "https://example.com/hook", &event_type).await;

    let mut ids = HashSet::new();
    for n in 0..30 {
        let created = dispatcher
            .submit_event(&Event::new(event_type.as_str(), json!({"n": n})))
            .await
            .unwrap();
        ids.insert(created[0].id);
    }

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let stores = Stores::shared(store);
                let mut mine = Vec::new();
                loop {
                    let batch = stores.queue.dequeue_due(4, Utc::now()).await.unwrap();
                    if batch.is_empty() {
                        return mine;
                    }
                    mine.extend(batch.into_iter().map(|d| d.id));
                }
            })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), unique.len(), "a delivery was claimed twice");
    assert!(ids.is_subset(&unique));
}

#[tokio::test]
async fn test_append_rejects_out_of_order_attempt() {
    let (_store, dispatcher) = pg_dispatcher().await;
    let event_type = scoped_event_type();
    let endpoint = register(&dispatcher, "https://example.com/hook", &event_type).await;
    let event = Event::new(event_type.as_str(), json!({}));
    let delivery = Delivery::new(&event, endpoint.id, Utc::now());
    dispatcher.queue().enqueue(delivery.clone()).await.unwrap();

    let attempt = |n: i32| DeliveryAttempt {
        id: Uuid::new_v4(),
        delivery_id: delivery.id,
        attempt_number: n,
        signature: "sha256=00".into(),
        signed_at: Utc::now().timestamp(),
        response_code: Some(500),
        transport_error: None,
        error: Some("HTTP 500".into()),
        response_body: Some("oops".into()),
        latency_ms: 12,
        attempted_at: Utc::now(),
    };

    let err = dispatcher.log().append(attempt(2)).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    dispatcher.log().append(attempt(1)).await.unwrap();
    let err = dispatcher.log().append(attempt(1)).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    let history = dispatcher.log().history(delivery.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].response_code, Some(500));
    assert_eq!(history[0].response_body.as_deref(), Some("oops"));

    let stored = dispatcher.queue().find_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 1);
}

#[tokio::test]
async fn test_terminal_rows_reject_transitions() {
    let (_store, dispatcher) = pg_dispatcher().await;
    let event_type = scoped_event_type();
    let endpoint = register(&dispatcher, "https://example.com/hook", &event_type).await;
    let event = Event::new(event_type.as_str(), json!({}));
    let delivery = Delivery::new(&event, endpoint.id, Utc::now());
    dispatcher.queue().enqueue(delivery.clone()).await.unwrap();

    // Not in flight yet.
    assert!(!dispatcher
        .queue()
        .complete(delivery.id, TerminalStatus::Succeeded, None)
        .await
        .unwrap());

    dispatcher.registry().disable(endpoint.id).await.unwrap();
    let outcome = dispatcher.process(delivery.clone()).await.unwrap();
    assert!(matches!(
        outcome,
        courier_webhooks::DeliveryOutcome::FailedTerminal { .. }
            | courier_webhooks::DeliveryOutcome::Superseded
    ));
}

#[tokio::test]
async fn test_end_to_end_delivery_against_postgres() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FailingResponder::fail_times(1))
        .mount(&server)
        .await;

    let (_store, dispatcher) = pg_dispatcher().await;
    let event_type = scoped_event_type();
    let endpoint = register(&dispatcher, &server.uri(), &event_type).await;
    let created = dispatcher
        .submit_event(&Event::new(event_type.as_str(), json!({"x": true})))
        .await
        .unwrap();
    let id = created[0].id;

    let started = std::time::Instant::now();
    loop {
        dispatcher.run_once().await.unwrap();
        let delivery = dispatcher.queue().find_delivery(id).await.unwrap().unwrap();
        if delivery.reported_status().is_terminal() {
            assert_eq!(delivery.reported_status(), DeliveryStatus::Succeeded);
            assert_eq!(delivery.attempt_count, 2);
            break;
        }
        assert!(started.elapsed() < Duration::from_secs(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let succeeded = dispatcher
        .queue()
        .list_by_endpoint(endpoint.id, Some(DeliveryStatus::Succeeded), 10, 0)
        .await
        .unwrap();
    assert_eq!(succeeded.len(), 1);
    assert_eq!(
        dispatcher
            .queue()
            .count_by_endpoint(endpoint.id, Some(DeliveryStatus::FailedRetryable))
            .await
            .unwrap(),
        0
    );
}
