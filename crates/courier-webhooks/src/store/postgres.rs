//! PostgreSQL store over the `courier-db` row models.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use courier_db::models::{
    CreateWebhookDelivery, CreateWebhookDeliveryAttempt, CreateWebhookEndpoint,
    UpdateWebhookEndpoint, WebhookDelivery, WebhookDeliveryAttempt, WebhookEndpoint,
};

use super::{DeliveryLog, DeliveryQueue, EndpointChanges, EndpointStore};
use crate::error::StorageError;
use crate::models::{
    Delivery, DeliveryAttempt, DeliveryStatus, Endpoint, StoredStatus, TerminalStatus,
    TransportErrorKind,
};

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

fn endpoint_from_row(row: WebhookEndpoint) -> Endpoint {
    Endpoint {
        id: row.id,
        url: row.url,
        secret: row.secret,
        event_types: row.event_types,
        description: row.description,
        enabled: row.enabled,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn delivery_from_row(row: WebhookDelivery) -> Result<Delivery, StorageError> {
    let status: StoredStatus = row
        .status
        .parse()
        .map_err(|e: String| StorageError::InvalidData(format!("delivery {}: {e}", row.id)))?;

    Ok(Delivery {
        id: row.id,
        event_id: row.event_id,
        endpoint_id: row.endpoint_id,
        event_type: row.event_type,
        payload: row.payload,
        occurred_at: row.occurred_at,
        status,
        attempt_count: row.attempt_count,
        next_attempt_at: row.next_attempt_at,
        last_error: row.last_error,
        claimed_at: row.claimed_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        completed_at: row.completed_at,
    })
}

fn attempt_from_row(row: WebhookDeliveryAttempt) -> Result<DeliveryAttempt, StorageError> {
    let transport_error = row
        .transport_error
        .as_deref()
        .map(str::parse::<TransportErrorKind>)
        .transpose()
        .map_err(|e: String| StorageError::InvalidData(format!("attempt {}: {e}", row.id)))?;
    let response_code = row
        .response_code
        .map(u16::try_from)
        .transpose()
        .map_err(|_| {
            StorageError::InvalidData(format!("attempt {}: negative response code", row.id))
        })?;

    Ok(DeliveryAttempt {
        id: row.id,
        delivery_id: row.delivery_id,
        attempt_number: row.attempt_number,
        signature: row.signature,
        signed_at: row.signed_at,
        response_code,
        transport_error,
        error: row.error_message,
        response_body: row.response_body,
        latency_ms: row.latency_ms,
        attempted_at: row.attempted_at,
    })
}

fn deliveries_from_rows(rows: Vec<WebhookDelivery>) -> Result<Vec<Delivery>, StorageError> {
    rows.into_iter().map(delivery_from_row).collect()
}

// ---------------------------------------------------------------------------
// EndpointStore
// ---------------------------------------------------------------------------

#[async_trait]
impl EndpointStore for PgStore {
    async fn insert_endpoint(&self, endpoint: Endpoint) -> Result<Endpoint, StorageError> {
        let row = WebhookEndpoint::create(
            &self.pool,
            CreateWebhookEndpoint {
                id: endpoint.id,
                url: endpoint.url,
                secret: endpoint.secret,
                event_types: endpoint.event_types,
                description: endpoint.description,
                enabled: endpoint.enabled,
                created_at: endpoint.created_at,
            },
        )
        .await?;
        Ok(endpoint_from_row(row))
    }

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>, StorageError> {
        Ok(WebhookEndpoint::find_by_id(&self.pool, id)
            .await?
            .map(endpoint_from_row))
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, StorageError> {
        let rows = WebhookEndpoint::list_all(&self.pool).await?;
        Ok(rows.into_iter().map(endpoint_from_row).collect())
    }

    async fn list_enabled_endpoints(&self) -> Result<Vec<Endpoint>, StorageError> {
        let rows = WebhookEndpoint::list_enabled(&self.pool).await?;
        Ok(rows.into_iter().map(endpoint_from_row).collect())
    }

    async fn set_endpoint_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<Endpoint>, StorageError> {
        Ok(WebhookEndpoint::set_enabled(&self.pool, id, enabled)
            .await?
            .map(endpoint_from_row))
    }

    async fn set_endpoint_secret(
        &self,
        id: Uuid,
        secret: &str,
    ) -> Result<Option<Endpoint>, StorageError> {
        Ok(WebhookEndpoint::set_secret(&self.pool, id, secret)
            .await?
            .map(endpoint_from_row))
    }

    async fn update_endpoint(
        &self,
        id: Uuid,
        changes: EndpointChanges,
    ) -> Result<Option<Endpoint>, StorageError> {
        let input = UpdateWebhookEndpoint {
            url: changes.url,
            event_types: changes.event_types,
            description: changes.description,
        };
        Ok(WebhookEndpoint::update(&self.pool, id, input)
            .await?
            .map(endpoint_from_row))
    }
}

// ---------------------------------------------------------------------------
// DeliveryQueue
// ---------------------------------------------------------------------------

#[async_trait]
impl DeliveryQueue for PgStore {
    async fn enqueue(&self, delivery: Delivery) -> Result<Option<Delivery>, StorageError> {
        let row = WebhookDelivery::create(
            &self.pool,
            CreateWebhookDelivery {
                id: delivery.id,
                event_id: delivery.event_id,
                endpoint_id: delivery.endpoint_id,
                event_type: delivery.event_type,
                payload: delivery.payload,
                occurred_at: delivery.occurred_at,
                next_attempt_at: delivery.next_attempt_at,
                created_at: delivery.created_at,
            },
        )
        .await?;
        row.map(delivery_from_row).transpose()
    }

    async fn dequeue_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut claimed = deliveries_from_rows(
            WebhookDelivery::claim_due(&self.pool, now, limit).await?,
        )?;
        // RETURNING does not preserve the subquery order.
        claimed.sort_by(|a, b| {
            (a.next_attempt_at, a.created_at, a.id).cmp(&(b.next_attempt_at, b.created_at, b.id))
        });
        Ok(claimed)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        not_before: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StorageError> {
        Ok(WebhookDelivery::reschedule(&self.pool, id, not_before, error)
            .await?
            .is_some())
    }

    async fn complete(
        &self,
        id: Uuid,
        status: TerminalStatus,
        error: Option<&str>,
    ) -> Result<bool, StorageError> {
        let stored: StoredStatus = status.into();
        Ok(
            WebhookDelivery::complete(&self.pool, id, stored.as_str(), error)
                .await?
                .is_some(),
        )
    }

    async fn stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, StorageError> {
        deliveries_from_rows(WebhookDelivery::find_stale_claims(&self.pool, claimed_before).await?)
    }

    async fn release_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        Ok(WebhookDelivery::release_claim(&self.pool, id, claimed_at)
            .await?
            .is_some())
    }

    async fn find_delivery(&self, id: Uuid) -> Result<Option<Delivery>, StorageError> {
        WebhookDelivery::find_by_id(&self.pool, id)
            .await?
            .map(delivery_from_row)
            .transpose()
    }

    async fn find_delivery_for(
        &self,
        event_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<Option<Delivery>, StorageError> {
        WebhookDelivery::find_by_event_and_endpoint(&self.pool, event_id, endpoint_id)
            .await?
            .map(delivery_from_row)
            .transpose()
    }

    async fn list_by_endpoint(
        &self,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Delivery>, StorageError> {
        let rows = WebhookDelivery::list_by_endpoint(
            &self.pool,
            endpoint_id,
            status.as_ref().map(DeliveryStatus::as_str),
            limit,
            offset,
        )
        .await?;
        deliveries_from_rows(rows)
    }

    async fn count_by_endpoint(
        &self,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, StorageError> {
        Ok(WebhookDelivery::count_by_endpoint(
            &self.pool,
            endpoint_id,
            status.as_ref().map(DeliveryStatus::as_str),
        )
        .await?)
    }
}

// ---------------------------------------------------------------------------
// DeliveryLog
// ---------------------------------------------------------------------------

#[async_trait]
impl DeliveryLog for PgStore {
    async fn append(&self, attempt: DeliveryAttempt) -> Result<(), StorageError> {
        let delivery_id = attempt.delivery_id;
        let attempt_number = attempt.attempt_number;

        let appended = WebhookDeliveryAttempt::append(
            &self.pool,
            CreateWebhookDeliveryAttempt {
                id: attempt.id,
                delivery_id,
                attempt_number,
                signature: attempt.signature,
                signed_at: attempt.signed_at,
                response_code: attempt.response_code.map(|c| c as i16),
                transport_error: attempt.transport_error.map(|k| k.as_str().to_string()),
                error_message: attempt.error,
                response_body: attempt.response_body,
                latency_ms: attempt.latency_ms,
                attempted_at: attempt.attempted_at,
            },
        )
        .await?;

        match appended {
            Some(_) => Ok(()),
            None => Err(StorageError::Conflict(format!(
                "attempt {attempt_number} does not follow the attempt count of delivery {delivery_id}"
            ))),
        }
    }

    async fn history(&self, delivery_id: Uuid) -> Result<Vec<DeliveryAttempt>, StorageError> {
        WebhookDeliveryAttempt::list_by_delivery(&self.pool, delivery_id)
            .await?
            .into_iter()
            .map(attempt_from_row)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> WebhookDelivery {
        let now = Utc::now();
        WebhookDelivery {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            endpoint_id: Uuid::new_v4(),
            event_type: "order.created".into(),
            payload: serde_json::json!({"a": 1}),
            occurred_at: now,
            status: status.into(),
            attempt_count: 2,
            next_attempt_at: now,
            last_error: Some("HTTP 500".into()),
            claimed_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_delivery_row_conversion() {
        let delivery = delivery_from_row(row("pending")).unwrap();
        assert_eq!(delivery.status, StoredStatus::Pending);
        assert_eq!(delivery.reported_status(), DeliveryStatus::FailedRetryable);
    }

    #[test]
    fn test_delivery_row_with_unknown_status_is_rejected() {
        let err = delivery_from_row(row("exploded")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[test]
    fn test_attempt_row_conversion() {
        let attempt = attempt_from_row(WebhookDeliveryAttempt {
            id: Uuid::new_v4(),
            delivery_id: Uuid::new_v4(),
            attempt_number: 1,
            signature: "sha256=ab".into(),
            signed_at: 1_706_400_000,
            response_code: None,
            transport_error: Some("timeout".into()),
            error_message: Some("Request timeout".into()),
            response_body: None,
            latency_ms: 10_000,
            attempted_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(attempt.transport_error, Some(TransportErrorKind::Timeout));
        assert!(attempt.failure().is_some_and(|f| f.is_retryable()));
    }
}
