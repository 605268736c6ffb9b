//! In-process store for tests and development.
//!
//! Deliveries and attempts share one mutex so that claiming, appending and
//! transitioning each happen in a single critical section.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{DeliveryLog, DeliveryQueue, EndpointChanges, EndpointStore};
use crate::error::StorageError;
use crate::models::{
    Delivery, DeliveryAttempt, DeliveryStatus, Endpoint, StoredStatus, TerminalStatus,
};

struct QueuedDelivery {
    seq: u64,
    delivery: Delivery,
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    deliveries: HashMap<Uuid, QueuedDelivery>,
    by_pair: HashMap<(Uuid, Uuid), Uuid>,
    attempts: HashMap<Uuid, Vec<DeliveryAttempt>>,
}

impl QueueState {
    /// Apply `f` if the delivery is currently in flight.
    fn transition_in_flight(&mut self, id: Uuid, f: impl FnOnce(&mut Delivery)) -> bool {
        match self.deliveries.get_mut(&id) {
            Some(entry) if entry.delivery.status == StoredStatus::InFlight => {
                f(&mut entry.delivery);
                entry.delivery.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn sorted_for_endpoint(
        &self,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Vec<&QueuedDelivery> {
        let mut matching: Vec<&QueuedDelivery> = self
            .deliveries
            .values()
            .filter(|e| e.delivery.endpoint_id == endpoint_id)
            .filter(|e| status.map_or(true, |s| e.delivery.reported_status() == s))
            .collect();
        // newest first
        matching.sort_by(|a, b| b.seq.cmp(&a.seq));
        matching
    }
}

/// In-memory implementation of all three store traits.
#[derive(Default)]
pub struct InMemoryStore {
    endpoints: RwLock<Vec<Endpoint>>,
    queue: Mutex<QueueState>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StorageError::Unavailable`
    /// until reset. Used to exercise outage handling.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn modify_endpoint(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Endpoint) + Send,
    ) -> Result<Option<Endpoint>, StorageError> {
        self.check_available()?;
        let mut endpoints = self.endpoints.write().await;
        Ok(endpoints.iter_mut().find(|e| e.id == id).map(|endpoint| {
            f(endpoint);
            endpoint.updated_at = Utc::now();
            endpoint.clone()
        }))
    }
}

#[async_trait]
impl EndpointStore for InMemoryStore {
    async fn insert_endpoint(&self, endpoint: Endpoint) -> Result<Endpoint, StorageError> {
        self.check_available()?;
        let mut endpoints = self.endpoints.write().await;
        if endpoints.iter().any(|e| e.id == endpoint.id) {
            return Err(StorageError::Conflict(format!(
                "endpoint {} already exists",
                endpoint.id
            )));
        }
        endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>, StorageError> {
        self.check_available()?;
        let endpoints = self.endpoints.read().await;
        Ok(endpoints.iter().find(|e| e.id == id).cloned())
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, StorageError> {
        self.check_available()?;
        let mut all = self.endpoints.read().await.clone();
        all.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(all)
    }

    async fn list_enabled_endpoints(&self) -> Result<Vec<Endpoint>, StorageError> {
        let mut enabled = self.list_endpoints().await?;
        enabled.retain(|e| e.enabled);
        Ok(enabled)
    }

    async fn set_endpoint_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<Endpoint>, StorageError> {
        self.modify_endpoint(id, |e| e.enabled = enabled).await
    }

    async fn set_endpoint_secret(
        &self,
        id: Uuid,
        secret: &str,
    ) -> Result<Option<Endpoint>, StorageError> {
        let secret = secret.to_string();
        self.modify_endpoint(id, move |e| e.secret = secret).await
    }

    async fn update_endpoint(
        &self,
        id: Uuid,
        changes: EndpointChanges,
    ) -> Result<Option<Endpoint>, StorageError> {
        self.modify_endpoint(id, move |e| {
            if let Some(url) = changes.url {
                e.url = url;
            }
            if let Some(event_types) = changes.event_types {
                e.event_types = event_types;
            }
            if let Some(description) = changes.description {
                e.description = Some(description);
            }
        })
        .await
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryStore {
    async fn enqueue(&self, delivery: Delivery) -> Result<Option<Delivery>, StorageError> {
        self.check_available()?;
        let mut state = self.queue.lock().await;

        let pair = (delivery.event_id, delivery.endpoint_id);
        if state.by_pair.contains_key(&pair) {
            return Ok(None);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.by_pair.insert(pair, delivery.id);
        state.deliveries.insert(
            delivery.id,
            QueuedDelivery {
                seq,
                delivery: delivery.clone(),
            },
        );
        Ok(Some(delivery))
    }

    async fn dequeue_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, StorageError> {
        self.check_available()?;
        let mut state = self.queue.lock().await;

        let mut due: Vec<(DateTime<Utc>, u64, Uuid)> = state
            .deliveries
            .values()
            .filter(|e| e.delivery.status == StoredStatus::Pending)
            .filter(|e| e.delivery.next_attempt_at <= now)
            .map(|e| (e.delivery.next_attempt_at, e.seq, e.delivery.id))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, _, id) in due {
            if let Some(entry) = state.deliveries.get_mut(&id) {
                entry.delivery.status = StoredStatus::InFlight;
                entry.delivery.claimed_at = Some(now);
                entry.delivery.updated_at = now;
                claimed.push(entry.delivery.clone());
            }
        }
        Ok(claimed)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        not_before: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StorageError> {
        self.check_available()?;
        let mut state = self.queue.lock().await;
        Ok(state.transition_in_flight(id, |d| {
            d.status = StoredStatus::Pending;
            d.next_attempt_at = not_before;
            d.last_error = Some(error.to_string());
            d.claimed_at = None;
        }))
    }

    async fn complete(
        &self,
        id: Uuid,
        status: TerminalStatus,
        error: Option<&str>,
    ) -> Result<bool, StorageError> {
        self.check_available()?;
        let mut state = self.queue.lock().await;
        Ok(state.transition_in_flight(id, |d| {
            d.status = status.into();
            if let Some(error) = error {
                d.last_error = Some(error.to_string());
            }
            d.claimed_at = None;
            d.completed_at = Some(Utc::now());
        }))
    }

    async fn stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, StorageError> {
        self.check_available()?;
        let state = self.queue.lock().await;
        let mut stale: Vec<Delivery> = state
            .deliveries
            .values()
            .map(|e| &e.delivery)
            .filter(|d| d.status == StoredStatus::InFlight)
            .filter(|d| d.claimed_at.is_some_and(|at| at < claimed_before))
            .cloned()
            .collect();
        stale.sort_by_key(|d| d.claimed_at);
        Ok(stale)
    }

    async fn release_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.check_available()?;
        let mut state = self.queue.lock().await;
        let still_same_claim = state
            .deliveries
            .get(&id)
            .is_some_and(|e| e.delivery.claimed_at == Some(claimed_at));
        if !still_same_claim {
            return Ok(false);
        }
        Ok(state.transition_in_flight(id, |d| {
            d.status = StoredStatus::Pending;
            d.claimed_at = None;
        }))
    }

    async fn find_delivery(&self, id: Uuid) -> Result<Option<Delivery>, StorageError> {
        self.check_available()?;
        let state = self.queue.lock().await;
        Ok(state.deliveries.get(&id).map(|e| e.delivery.clone()))
    }

    async fn find_delivery_for(
        &self,
        event_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<Option<Delivery>, StorageError> {
        self.check_available()?;
        let state = self.queue.lock().await;
        Ok(state
            .by_pair
            .get(&(event_id, endpoint_id))
            .and_then(|id| state.deliveries.get(id))
            .map(|e| e.delivery.clone()))
    }

    async fn list_by_endpoint(
        &self,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Delivery>, StorageError> {
        self.check_available()?;
        let state = self.queue.lock().await;
        let skip = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let take = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .sorted_for_endpoint(endpoint_id, status)
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|e| e.delivery.clone())
            .collect())
    }

    async fn count_by_endpoint(
        &self,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, StorageError> {
        self.check_available()?;
        let state = self.queue.lock().await;
        let count = state.sorted_for_endpoint(endpoint_id, status).len();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl DeliveryLog for InMemoryStore {
    async fn append(&self, attempt: DeliveryAttempt) -> Result<(), StorageError> {
        self.check_available()?;
        let mut state = self.queue.lock().await;

        let entry = state.deliveries.get_mut(&attempt.delivery_id).ok_or_else(|| {
            StorageError::Conflict(format!("delivery {} does not exist", attempt.delivery_id))
        })?;
        if attempt.attempt_number != entry.delivery.attempt_count + 1 {
            return Err(StorageError::Conflict(format!(
                "attempt {} does not follow attempt count {} of delivery {}",
                attempt.attempt_number, entry.delivery.attempt_count, attempt.delivery_id
            )));
        }
        entry.delivery.attempt_count = attempt.attempt_number;
        entry.delivery.updated_at = Utc::now();

        state
            .attempts
            .entry(attempt.delivery_id)
            .or_default()
            .push(attempt);
        Ok(())
    }

    async fn history(&self, delivery_id: Uuid) -> Result<Vec<DeliveryAttempt>, StorageError> {
        self.check_available()?;
        let state = self.queue.lock().await;
        Ok(state.attempts.get(&delivery_id).cloned().unwrap_or_default())
    }
}
