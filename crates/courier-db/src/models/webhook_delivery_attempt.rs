//! Delivery attempt model (append-only).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One HTTP call made for a delivery.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDeliveryAttempt {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub attempt_number: i32,
    pub signature: String,
    pub signed_at: i64,
    pub response_code: Option<i16>,
    pub transport_error: Option<String>,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
    pub latency_ms: i32,
    pub attempted_at: DateTime<Utc>,
}

/// Input for appending an attempt.
#[derive(Debug, Clone)]
pub struct CreateWebhookDeliveryAttempt {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub attempt_number: i32,
    pub signature: String,
    pub signed_at: i64,
    pub response_code: Option<i16>,
    pub transport_error: Option<String>,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
    pub latency_ms: i32,
    pub attempted_at: DateTime<Utc>,
}

impl WebhookDeliveryAttempt {
    /// Append an attempt and bump the delivery's attempt count in one
    /// transaction.
    ///
    /// Returns `None` (and writes nothing) if `attempt_number` does not
    /// directly follow the delivery's current attempt count.
    pub async fn append(
        pool: &PgPool,
        input: CreateWebhookDeliveryAttempt,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let bumped = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET attempt_count = $2, updated_at = NOW()
            WHERE id = $1 AND attempt_count = $2 - 1
            ",
        )
        .bind(input.delivery_id)
        .bind(input.attempt_number)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let attempt: Self = sqlx::query_as(
            r"
            INSERT INTO webhook_delivery_attempts
                (id, delivery_id, attempt_number, signature, signed_at, response_code,
                 transport_error, error_message, response_body, latency_ms, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            ",
        )
        .bind(input.id)
        .bind(input.delivery_id)
        .bind(input.attempt_number)
        .bind(&input.signature)
        .bind(input.signed_at)
        .bind(input.response_code)
        .bind(&input.transport_error)
        .bind(&input.error_message)
        .bind(&input.response_body)
        .bind(input.latency_ms)
        .bind(input.attempted_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(attempt))
    }

    /// Attempts for a delivery in attempt-number order.
    pub async fn list_by_delivery(
        pool: &PgPool,
        delivery_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_delivery_attempts
            WHERE delivery_id = $1
            ORDER BY attempt_number ASC
            ",
        )
        .bind(delivery_id)
        .fetch_all(pool)
        .await
    }
}
