//! Webhook endpoint model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A registered webhook endpoint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting an endpoint.
#[derive(Debug, Clone)]
pub struct CreateWebhookEndpoint {
    pub id: Uuid,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhookEndpoint {
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub description: Option<String>,
}

impl WebhookEndpoint {
    pub async fn create(pool: &PgPool, input: CreateWebhookEndpoint) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhook_endpoints
                (id, url, secret, event_types, description, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *
            ",
        )
        .bind(input.id)
        .bind(&input.url)
        .bind(&input.secret)
        .bind(&input.event_types)
        .bind(&input.description)
        .bind(input.enabled)
        .bind(input.created_at)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhook_endpoints WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All endpoints in registration order.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhook_endpoints ORDER BY created_at ASC, id ASC")
            .fetch_all(pool)
            .await
    }

    /// Enabled endpoints in registration order. Event-type filtering
    /// (including wildcards) happens in the registry.
    pub async fn list_enabled(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_endpoints
            WHERE enabled = TRUE
            ORDER BY created_at ASC, id ASC
            ",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn set_enabled(
        pool: &PgPool,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_endpoints
            SET enabled = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(enabled)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_secret(
        pool: &PgPool,
        id: Uuid,
        secret: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_endpoints
            SET secret = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(secret)
        .fetch_optional(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        input: UpdateWebhookEndpoint,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_endpoints
            SET url = COALESCE($2, url),
                event_types = COALESCE($3, event_types),
                description = COALESCE($4, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(input.url)
        .bind(input.event_types)
        .bind(input.description)
        .fetch_optional(pool)
        .await
    }
}
