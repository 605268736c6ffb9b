//! Event submission handler.

use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use crate::error::{ApiResult, WebhookError};
use crate::models::{Event, SubmitEventRequest, SubmitEventResponse};
use crate::router::WebhooksState;

/// Submit an event for delivery to every subscribed endpoint.
///
/// Deliveries are persisted before the response is sent; the HTTP calls
/// happen later on a worker.
#[utoipa::path(
    post,
    path = "/webhooks/events",
    tag = "Webhooks",
    request_body = SubmitEventRequest,
    responses(
        (status = 202, description = "Event accepted", body = SubmitEventResponse),
        (status = 400, description = "Validation error"),
    )
)]
pub async fn submit_event_handler(
    State(state): State<WebhooksState>,
    Json(request): Json<SubmitEventRequest>,
) -> ApiResult<(StatusCode, Json<SubmitEventResponse>)> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let event = Event::from(request);
    let created = state.dispatcher.submit_event(&event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitEventResponse {
            event_id: event.id,
            deliveries: created.into_iter().map(|d| d.id).collect(),
        }),
    ))
}
