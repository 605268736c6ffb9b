//! Integration tests for the service router.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_api::{api_doc, build_router, open_storage, Config, StorageBackend, Workers};
use courier_webhooks::{Dispatcher, Stores};
use serde_json::Value;
use tower::ServiceExt;

fn memory_dispatcher() -> Arc<Dispatcher> {
    let store = Arc::new(courier_webhooks::InMemoryStore::new());
    let config = Config::from_lookup(|_| None).unwrap();
    Arc::new(
        Dispatcher::new(
            Stores::shared(store),
            config.webhooks.registry_config(),
            config.webhooks.dispatcher_config(),
        )
        .unwrap(),
    )
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_storage() {
    let app = build_router(memory_dispatcher(), StorageBackend::Memory);
    let (status, body) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = build_router(memory_dispatcher(), StorageBackend::Memory);
    let (status, body) = get_json(app, "/api-docs/openapi.json").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["title"], "courier");
    assert!(body["paths"]["/webhooks/endpoints"].is_object());
    assert_eq!(
        body["paths"].as_object().unwrap().len(),
        api_doc().paths.paths.len()
    );
}

#[tokio::test]
async fn test_webhook_routes_are_mounted() {
    let app = build_router(memory_dispatcher(), StorageBackend::Memory);
    let (status, body) = get_json(app, "/webhooks/endpoints").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_memory_storage_without_database_url() {
    let config = Config::from_lookup(|_| None).unwrap();
    let (_stores, backend) = open_storage(&config).await.unwrap();
    assert_eq!(backend, StorageBackend::Memory);
}

#[tokio::test]
async fn test_workers_stop_on_request() {
    let config = Config::from_lookup(|name| (name == "WEBHOOK_WORKERS").then(|| "2".to_string()))
        .unwrap();
    let workers = Workers::spawn(&memory_dispatcher(), &config.webhooks);
    tokio::time::timeout(std::time::Duration::from_secs(5), workers.stop())
        .await
        .expect("workers stopped");
}
