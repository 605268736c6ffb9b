//! Delivery history query handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::error::{ApiResult, WebhookError};
use crate::models::{
    DeliveryAttemptListResponse, DeliveryAttemptResponse, DeliveryListQuery, DeliveryListResponse,
    DeliveryResponse,
};
use crate::router::WebhooksState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

// ---------------------------------------------------------------------------
// Delivery history handlers
// ---------------------------------------------------------------------------

/// List deliveries for an endpoint, newest first.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints/{id}/deliveries",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Endpoint ID"),
        DeliveryListQuery,
    ),
    responses(
        (status = 200, description = "Paginated delivery list", body = DeliveryListResponse),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn list_deliveries_handler(
    State(state): State<WebhooksState>,
    Path(endpoint_id): Path<Uuid>,
    Query(query): Query<DeliveryListQuery>,
) -> ApiResult<Json<DeliveryListResponse>> {
    // 404 for unknown endpoints rather than an empty page
    state.registry().get(endpoint_id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let queue = state.dispatcher.queue();
    let deliveries = queue
        .list_by_endpoint(endpoint_id, query.status, limit, offset)
        .await?;
    let total = queue.count_by_endpoint(endpoint_id, query.status).await?;

    Ok(Json(DeliveryListResponse {
        items: deliveries.into_iter().map(DeliveryResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get a single delivery with its current status and last error.
#[utoipa::path(
    get,
    path = "/webhooks/deliveries/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Delivery ID")
    ),
    responses(
        (status = 200, description = "Delivery details", body = DeliveryResponse),
        (status = 404, description = "Delivery not found"),
    )
)]
pub async fn get_delivery_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliveryResponse>> {
    let delivery = state
        .dispatcher
        .queue()
        .find_delivery(id)
        .await?
        .ok_or(WebhookError::DeliveryNotFound)?;

    Ok(Json(delivery.into()))
}

/// Attempt history of a delivery in attempt order.
#[utoipa::path(
    get,
    path = "/webhooks/deliveries/{id}/attempts",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Delivery ID")
    ),
    responses(
        (status = 200, description = "Attempt history", body = DeliveryAttemptListResponse),
        (status = 404, description = "Delivery not found"),
    )
)]
pub async fn list_attempts_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliveryAttemptListResponse>> {
    state
        .dispatcher
        .queue()
        .find_delivery(id)
        .await?
        .ok_or(WebhookError::DeliveryNotFound)?;

    let attempts = state.dispatcher.log().history(id).await?;

    Ok(Json(DeliveryAttemptListResponse {
        delivery_id: id,
        items: attempts
            .into_iter()
            .map(DeliveryAttemptResponse::from)
            .collect(),
    }))
}
