//! Webhook delivery model: the durable delivery queue.
//!
//! Every state transition out of `in_flight` is a compare-and-set on the
//! current status, so a delivery that reached `succeeded` or
//! `failed_terminal` can never be modified again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A delivery row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub event_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub status: String,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for enqueueing a delivery.
#[derive(Debug, Clone)]
pub struct CreateWebhookDelivery {
    pub id: Uuid,
    pub event_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Status filter fragment for list/count queries.
///
/// `failed_retryable` is not a stored status: it is a pending row that has
/// already been attempted.
fn status_clause(status: Option<&str>) -> &'static str {
    match status {
        Some("pending") => " AND status = 'pending' AND attempt_count = 0",
        Some("failed_retryable") => " AND status = 'pending' AND attempt_count > 0",
        Some("in_flight") => " AND status = 'in_flight'",
        Some("succeeded") => " AND status = 'succeeded'",
        Some("failed_terminal") => " AND status = 'failed_terminal'",
        _ => "",
    }
}

impl WebhookDelivery {
    /// Insert a delivery. Returns `None` when a delivery for the same
    /// (event, endpoint) pair already exists.
    pub async fn create(
        pool: &PgPool,
        input: CreateWebhookDelivery,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhook_deliveries
                (id, event_id, endpoint_id, event_type, payload, occurred_at,
                 status, attempt_count, next_attempt_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, $8, $8)
            ON CONFLICT (event_id, endpoint_id) DO NOTHING
            RETURNING *
            ",
        )
        .bind(input.id)
        .bind(input.event_id)
        .bind(input.endpoint_id)
        .bind(&input.event_type)
        .bind(&input.payload)
        .bind(input.occurred_at)
        .bind(input.next_attempt_at)
        .bind(input.created_at)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhook_deliveries WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_event_and_endpoint(
        pool: &PgPool,
        event_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhook_deliveries WHERE event_id = $1 AND endpoint_id = $2")
            .bind(event_id)
            .bind(endpoint_id)
            .fetch_optional(pool)
            .await
    }

    /// Claim up to `limit` due deliveries (with FOR UPDATE SKIP LOCKED).
    ///
    /// The select and the transition to `in_flight` run as one statement, so
    /// two workers can never claim the same row. Rows come back unordered;
    /// callers sort by due time.
    pub async fn claim_due(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET status = 'in_flight', claimed_at = $1, updated_at = $1
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'pending' AND next_attempt_at <= $1
                ORDER BY next_attempt_at ASC, created_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Move an in-flight delivery back to pending with a new due time.
    pub async fn reschedule(
        pool: &PgPool,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending',
                next_attempt_at = $2,
                last_error = $3,
                claimed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            RETURNING *
            ",
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(last_error)
        .fetch_optional(pool)
        .await
    }

    /// Move an in-flight delivery to a terminal status.
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        status: &str,
        last_error: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET status = $2,
                last_error = COALESCE($3, last_error),
                claimed_at = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            RETURNING *
            ",
        )
        .bind(id)
        .bind(status)
        .bind(last_error)
        .fetch_optional(pool)
        .await
    }

    /// In-flight deliveries claimed before `claimed_before`.
    pub async fn find_stale_claims(
        pool: &PgPool,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_deliveries
            WHERE status = 'in_flight' AND claimed_at < $1
            ORDER BY claimed_at ASC
            ",
        )
        .bind(claimed_before)
        .fetch_all(pool)
        .await
    }

    /// Release a claim back to pending, only if it is still the same claim.
    pub async fn release_claim(
        pool: &PgPool,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending', claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight' AND claimed_at = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(claimed_at)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_by_endpoint(
        pool: &PgPool,
        endpoint_id: Uuid,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT * FROM webhook_deliveries WHERE endpoint_id = $1{} \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            status_clause(status)
        );

        sqlx::query_as(&query)
            .bind(endpoint_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    pub async fn count_by_endpoint(
        pool: &PgPool,
        endpoint_id: Uuid,
        status: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let query = format!(
            "SELECT COUNT(*) FROM webhook_deliveries WHERE endpoint_id = $1{}",
            status_clause(status)
        );

        sqlx::query_scalar::<_, i64>(&query)
            .bind(endpoint_id)
            .fetch_one(pool)
            .await
    }
}
