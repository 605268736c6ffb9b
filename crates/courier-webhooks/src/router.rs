//! Axum router setup for webhook endpoints.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;

use crate::dispatcher::Dispatcher;
use crate::handlers::{deliveries, endpoints, events};
use crate::models;
use crate::registry::SubscriptionRegistry;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhooksState {
    pub dispatcher: Arc<Dispatcher>,
}

impl WebhooksState {
    /// Create a new webhooks state.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Get a reference to the subscription registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        self.dispatcher.registry()
    }
}

/// Creates the webhook router with all routes.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        // Endpoint management
        .route(
            "/webhooks/endpoints",
            post(endpoints::create_endpoint_handler).get(endpoints::list_endpoints_handler),
        )
        .route(
            "/webhooks/endpoints/:id",
            get(endpoints::get_endpoint_handler).patch(endpoints::update_endpoint_handler),
        )
        .route(
            "/webhooks/endpoints/:id/disable",
            post(endpoints::disable_endpoint_handler),
        )
        .route(
            "/webhooks/endpoints/:id/enable",
            post(endpoints::enable_endpoint_handler),
        )
        .route(
            "/webhooks/endpoints/:id/rotate-secret",
            post(endpoints::rotate_secret_handler),
        )
        // Event submission
        .route("/webhooks/events", post(events::submit_event_handler))
        // Delivery history
        .route(
            "/webhooks/endpoints/:id/deliveries",
            get(deliveries::list_deliveries_handler),
        )
        .route(
            "/webhooks/deliveries/:id",
            get(deliveries::get_delivery_handler),
        )
        .route(
            "/webhooks/deliveries/:id/attempts",
            get(deliveries::list_attempts_handler),
        )
        .with_state(state)
}

/// `OpenAPI` documentation for the webhook routes.
#[derive(OpenApi)]
#[openapi(
    paths(
        endpoints::create_endpoint_handler,
        endpoints::list_endpoints_handler,
        endpoints::get_endpoint_handler,
        endpoints::update_endpoint_handler,
        endpoints::disable_endpoint_handler,
        endpoints::enable_endpoint_handler,
        endpoints::rotate_secret_handler,
        events::submit_event_handler,
        deliveries::list_deliveries_handler,
        deliveries::get_delivery_handler,
        deliveries::list_attempts_handler,
    ),
    components(schemas(
        models::NewEndpoint,
        models::EndpointUpdate,
        models::EndpointResponse,
        models::EndpointCreatedResponse,
        models::EndpointListResponse,
        models::SecretResponse,
        models::SubmitEventRequest,
        models::SubmitEventResponse,
        models::DeliveryStatus,
        models::DeliveryResponse,
        models::DeliveryListResponse,
        models::TransportErrorKind,
        models::DeliveryAttemptResponse,
        models::DeliveryAttemptListResponse,
        crate::error::ErrorResponse,
    )),
    tags(
        (name = "Webhooks", description = "Outgoing webhook endpoints, events and delivery history")
    )
)]
pub struct WebhooksApiDoc;
