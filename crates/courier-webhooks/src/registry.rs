//! Subscription registry: which endpoints receive which event types.
//!
//! All validation happens before the store is touched, so a rejected
//! registration or update leaves no trace.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::crypto;
use crate::error::{StorageError, WebhookError};
use crate::models::{Endpoint, EndpointUpdate, NewEndpoint};
use crate::store::{EndpointChanges, EndpointStore};
use crate::validation;

/// Registration policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    allow_http: bool,
    allow_private_hosts: bool,
}

impl RegistryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow HTTP URLs (for development/testing).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Allow loopback and private-network hosts (for development/testing).
    #[must_use]
    pub fn with_allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    #[must_use]
    pub fn allow_http(&self) -> bool {
        self.allow_http
    }

    #[must_use]
    pub fn allow_private_hosts(&self) -> bool {
        self.allow_private_hosts
    }
}

/// Endpoint registration and event-type resolution over an [`EndpointStore`].
#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: Arc<dyn EndpointStore>,
    config: RegistryConfig,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn EndpointStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    fn validate_url(&self, url: &str) -> Result<(), WebhookError> {
        validation::validate_webhook_url(
            url,
            self.config.allow_http,
            self.config.allow_private_hosts,
        )
    }

    /// Register a new endpoint. A signing secret is generated when the
    /// request does not carry one.
    pub async fn register(&self, request: NewEndpoint) -> Result<Endpoint, WebhookError> {
        request
            .validate()
            .map_err(|e| WebhookError::Validation(e.to_string()))?;
        self.validate_url(&request.url)?;
        validation::validate_event_filters(&request.event_types)?;

        let now = Utc::now();
        let endpoint = Endpoint {
            id: Uuid::new_v4(),
            url: request.url,
            secret: request.secret.unwrap_or_else(crypto::generate_secret),
            event_types: request.event_types,
            description: request.description,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        let endpoint = self.store.insert_endpoint(endpoint).await?;

        tracing::info!(
            target: "webhook_registry",
            endpoint_id = %endpoint.id,
            url = %endpoint.url,
            event_types = ?endpoint.event_types,
            "Webhook endpoint registered"
        );

        Ok(endpoint)
    }

    /// Enabled endpoints subscribed to `event_type`, in registration order.
    pub async fn resolve(&self, event_type: &str) -> Result<Vec<Endpoint>, StorageError> {
        let mut endpoints = self.store.list_enabled_endpoints().await?;
        endpoints.retain(|e| {
            e.event_types
                .iter()
                .any(|filter| validation::filter_matches(filter, event_type))
        });
        Ok(endpoints)
    }

    /// Current state of an endpoint, read fresh from the store.
    pub async fn find(&self, id: Uuid) -> Result<Option<Endpoint>, StorageError> {
        self.store.get_endpoint(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Endpoint, WebhookError> {
        self.find(id).await?.ok_or(WebhookError::EndpointNotFound)
    }

    pub async fn list(&self) -> Result<Vec<Endpoint>, WebhookError> {
        Ok(self.store.list_endpoints().await?)
    }

    /// Stop new deliveries to an endpoint and short-circuit pending retries.
    /// Attempts already on the wire are not cancelled.
    pub async fn disable(&self, id: Uuid) -> Result<Endpoint, WebhookError> {
        let endpoint = self
            .store
            .set_endpoint_enabled(id, false)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(target: "webhook_registry", endpoint_id = %id, "Webhook endpoint disabled");
        Ok(endpoint)
    }

    pub async fn enable(&self, id: Uuid) -> Result<Endpoint, WebhookError> {
        let endpoint = self
            .store
            .set_endpoint_enabled(id, true)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(target: "webhook_registry", endpoint_id = %id, "Webhook endpoint enabled");
        Ok(endpoint)
    }

    /// Replace the signing secret and return the new one. Attempts already
    /// logged keep the signature they were sent with.
    pub async fn rotate_secret(&self, id: Uuid) -> Result<String, WebhookError> {
        let secret = crypto::generate_secret();
        self.store
            .set_endpoint_secret(id, &secret)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(target: "webhook_registry", endpoint_id = %id, "Webhook signing secret rotated");
        Ok(secret)
    }

    /// Change url, filters or description. New values are validated like a
    /// registration.
    pub async fn update(&self, id: Uuid, request: EndpointUpdate) -> Result<Endpoint, WebhookError> {
        request
            .validate()
            .map_err(|e| WebhookError::Validation(e.to_string()))?;
        if let Some(ref url) = request.url {
            self.validate_url(url)?;
        }
        if let Some(ref event_types) = request.event_types {
            validation::validate_event_filters(event_types)?;
        }

        let changes = EndpointChanges {
            url: request.url,
            event_types: request.event_types,
            description: request.description,
        };
        let endpoint = self
            .store
            .update_endpoint(id, changes)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(target: "webhook_registry", endpoint_id = %id, "Webhook endpoint updated");
        Ok(endpoint)
    }
}
