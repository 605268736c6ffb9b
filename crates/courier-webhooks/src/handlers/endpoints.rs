//! Endpoint management handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{
    EndpointCreatedResponse, EndpointListResponse, EndpointResponse, EndpointUpdate, NewEndpoint,
    SecretResponse,
};
use crate::router::WebhooksState;

// ---------------------------------------------------------------------------
// Endpoint CRUD handlers
// ---------------------------------------------------------------------------

/// Register a new webhook endpoint.
///
/// The signing secret is returned only in this response and on rotation.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints",
    tag = "Webhooks",
    request_body = NewEndpoint,
    responses(
        (status = 201, description = "Endpoint registered", body = EndpointCreatedResponse),
        (status = 400, description = "Validation error"),
    )
)]
pub async fn create_endpoint_handler(
    State(state): State<WebhooksState>,
    Json(request): Json<NewEndpoint>,
) -> ApiResult<(StatusCode, Json<EndpointCreatedResponse>)> {
    let endpoint = state.registry().register(request).await?;
    let secret = endpoint.secret.clone();

    Ok((
        StatusCode::CREATED,
        Json(EndpointCreatedResponse {
            endpoint: endpoint.into(),
            secret,
        }),
    ))
}

/// List all endpoints in registration order.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Endpoint list", body = EndpointListResponse),
    )
)]
pub async fn list_endpoints_handler(
    State(state): State<WebhooksState>,
) -> ApiResult<Json<EndpointListResponse>> {
    let endpoints = state.registry().list().await?;
    let total = i64::try_from(endpoints.len()).unwrap_or(i64::MAX);

    Ok(Json(EndpointListResponse {
        items: endpoints.into_iter().map(EndpointResponse::from).collect(),
        total,
    }))
}

/// Get a single endpoint.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Endpoint details", body = EndpointResponse),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn get_endpoint_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    let endpoint = state.registry().get(id).await?;
    Ok(Json(endpoint.into()))
}

/// Update url, event types or description.
#[utoipa::path(
    patch,
    path = "/webhooks/endpoints/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    request_body = EndpointUpdate,
    responses(
        (status = 200, description = "Endpoint updated", body = EndpointResponse),
        (status = 400, description = "Validation error"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn update_endpoint_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EndpointUpdate>,
) -> ApiResult<Json<EndpointResponse>> {
    let endpoint = state.registry().update(id, request).await?;
    Ok(Json(endpoint.into()))
}

// ---------------------------------------------------------------------------
// Lifecycle handlers
// ---------------------------------------------------------------------------

/// Disable an endpoint. Pending retries to it fail on their next attempt.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/disable",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Endpoint disabled", body = EndpointResponse),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn disable_endpoint_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    let endpoint = state.registry().disable(id).await?;
    Ok(Json(endpoint.into()))
}

/// Re-enable an endpoint for new events.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/enable",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Endpoint enabled", body = EndpointResponse),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn enable_endpoint_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    let endpoint = state.registry().enable(id).await?;
    Ok(Json(endpoint.into()))
}

/// Replace the endpoint's signing secret.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/rotate-secret",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "New secret", body = SecretResponse),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn rotate_secret_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SecretResponse>> {
    let secret = state.registry().rotate_secret(id).await?;
    Ok(Json(SecretResponse {
        endpoint_id: id,
        secret,
    }))
}
