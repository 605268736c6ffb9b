//! Storage selection, worker startup and router assembly.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use courier_db::DbError;
use courier_webhooks::{
    webhooks_router, Dispatcher, InMemoryStore, PgStore, Stores, WebhookWorker,
    WebhooksApiDoc, WebhooksState,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use utoipa::OpenApi;

use crate::config::{Config, WebhookSettings};
use crate::health::health_handler;

/// Which store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

/// State for the service's own routes.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageBackend,
}

/// Connect to PostgreSQL and apply migrations when `DATABASE_URL` is set,
/// otherwise fall back to the in-memory store.
///
/// # Errors
///
/// Returns `DbError` if the database is unreachable or a migration fails.
pub async fn open_storage(config: &Config) -> Result<(Stores, StorageBackend), DbError> {
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = courier_db::connect(url, config.database_max_connections).await?;
            courier_db::run_migrations(&pool).await?;
            Ok((
                Stores::shared(Arc::new(PgStore::new(pool))),
                StorageBackend::Postgres,
            ))
        }
        None => Ok((
            Stores::shared(Arc::new(InMemoryStore::new())),
            StorageBackend::Memory,
        )),
    }
}

/// Running delivery workers.
pub struct Workers {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Spawn `settings.workers` workers over `dispatcher`, all stopped by one
    /// token.
    #[must_use]
    pub fn spawn(dispatcher: &Arc<Dispatcher>, settings: &WebhookSettings) -> Self {
        let shutdown = CancellationToken::new();
        let count = settings.workers.max(1);
        let handles = (0..count)
            .map(|_| {
                let worker = WebhookWorker::new(dispatcher.clone(), settings.worker_config())
                    .with_shutdown(shutdown.clone());
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            workers = count,
            concurrency = settings.concurrency,
            "Webhook delivery workers started"
        );

        Self { shutdown, handles }
    }

    /// Cancel every worker and wait for in-flight deliveries to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Webhook worker task failed");
            }
        }
        info!("Webhook delivery workers stopped");
    }
}

/// Full `OpenAPI` document served by the service.
#[must_use]
pub fn api_doc() -> utoipa::openapi::OpenApi {
    let mut doc = WebhooksApiDoc::openapi();
    doc.info.title = "courier".to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(api_doc())
}

/// Webhook management routes plus `/health` and the `OpenAPI` document.
pub fn build_router(dispatcher: Arc<Dispatcher>, storage: StorageBackend) -> Router {
    let service_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        .with_state(AppState { storage });

    Router::new()
        .merge(webhooks_router(WebhooksState::new(dispatcher)))
        .merge(service_routes)
}
