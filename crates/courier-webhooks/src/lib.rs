//! Outgoing webhook delivery.
//!
//! Notifies registered HTTP endpoints when domain events occur. Payloads are
//! signed with HMAC-SHA256, deliveries are persisted in a durable queue and
//! retried with exponential backoff, and every attempt is recorded in an
//! append-only log.

pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod models;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod router;
pub mod store;
pub mod validation;
pub mod worker;

pub use dispatcher::{DeliveryOutcome, Dispatcher, DispatcherConfig};
pub use error::{StorageError, WebhookError};
pub use models::{Delivery, DeliveryAttempt, DeliveryStatus, Endpoint, Event};
pub use publisher::EventPublisher;
pub use registry::{RegistryConfig, SubscriptionRegistry};
pub use retry::RetryPolicy;
pub use router::{webhooks_router, WebhooksApiDoc, WebhooksState};
pub use store::{InMemoryStore, PgStore, Stores};
pub use worker::{WebhookWorker, WorkerConfig};
