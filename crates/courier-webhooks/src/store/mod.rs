//! Storage seams for endpoints, the delivery queue and the attempt log.
//!
//! Two implementations ship with the crate:
//! - [`memory::InMemoryStore`] for tests and single-process development
//! - [`postgres::PgStore`] backed by the `courier-db` tables

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{Delivery, DeliveryAttempt, DeliveryStatus, Endpoint, TerminalStatus};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Field changes applied by [`EndpointStore::update_endpoint`]. `None`
/// leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct EndpointChanges {
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub description: Option<String>,
}

/// Persistent endpoint configuration.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn insert_endpoint(&self, endpoint: Endpoint) -> Result<Endpoint, StorageError>;

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>, StorageError>;

    /// All endpoints in registration order.
    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, StorageError>;

    /// Enabled endpoints in registration order (ties by id).
    async fn list_enabled_endpoints(&self) -> Result<Vec<Endpoint>, StorageError>;

    async fn set_endpoint_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<Endpoint>, StorageError>;

    async fn set_endpoint_secret(
        &self,
        id: Uuid,
        secret: &str,
    ) -> Result<Option<Endpoint>, StorageError>;

    async fn update_endpoint(
        &self,
        id: Uuid,
        changes: EndpointChanges,
    ) -> Result<Option<Endpoint>, StorageError>;
}

/// Durable work queue of deliveries.
///
/// Every transition out of `in_flight` is conditional on the delivery still
/// being `in_flight`; the `bool` results report whether it applied.
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Insert a pending delivery. Returns `None` if a delivery for the same
    /// (event, endpoint) pair already exists.
    async fn enqueue(&self, delivery: Delivery) -> Result<Option<Delivery>, StorageError>;

    /// Atomically claim up to `limit` pending deliveries due at `now`,
    /// oldest-due first, moving them to `in_flight`.
    async fn dequeue_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, StorageError>;

    /// `in_flight -> pending` with a new not-before time.
    async fn reschedule(
        &self,
        id: Uuid,
        not_before: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StorageError>;

    /// `in_flight -> succeeded | failed_terminal`.
    async fn complete(
        &self,
        id: Uuid,
        status: TerminalStatus,
        error: Option<&str>,
    ) -> Result<bool, StorageError>;

    /// In-flight deliveries claimed before `claimed_before`.
    async fn stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, StorageError>;

    /// `in_flight -> pending`, only if the claim is still the one taken at
    /// `claimed_at`.
    async fn release_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    async fn find_delivery(&self, id: Uuid) -> Result<Option<Delivery>, StorageError>;

    async fn find_delivery_for(
        &self,
        event_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<Option<Delivery>, StorageError>;

    /// Newest first.
    async fn list_by_endpoint(
        &self,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Delivery>, StorageError>;

    async fn count_by_endpoint(
        &self,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, StorageError>;
}

/// Append-only attempt history.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    /// Record an attempt and bump the delivery's `attempt_count` in the same
    /// operation.
    ///
    /// Fails with `StorageError::Conflict` if `attempt_number` is not
    /// `attempt_count + 1`.
    async fn append(&self, attempt: DeliveryAttempt) -> Result<(), StorageError>;

    /// Attempts in attempt-number order.
    async fn history(&self, delivery_id: Uuid) -> Result<Vec<DeliveryAttempt>, StorageError>;
}

/// The three stores as shared trait objects.
#[derive(Clone)]
pub struct Stores {
    pub endpoints: Arc<dyn EndpointStore>,
    pub queue: Arc<dyn DeliveryQueue>,
    pub log: Arc<dyn DeliveryLog>,
}

impl Stores {
    /// Use one backend for all three roles.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: EndpointStore + DeliveryQueue + DeliveryLog + 'static,
    {
        Self {
            endpoints: store.clone(),
            queue: store.clone(),
            log: store,
        }
    }
}
