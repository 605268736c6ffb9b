//! Webhook delivery execution.
//!
//! Turns events into deliveries, claims due deliveries from the queue,
//! executes signed HTTP POSTs and records the outcome.
//!
//! Every attempt is appended to the delivery log *before* the queue
//! transition, so a crash between the two leaves an in-flight delivery whose
//! outcome is already known. [`Dispatcher::sweep_stale`] finishes such
//! deliveries (or releases them if nothing was logged).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use uuid::Uuid;

use crate::crypto;
use crate::error::{StorageError, WebhookError};
use crate::models::{
    AttemptFailure, Delivery, DeliveryAttempt, Endpoint, Event, TerminalStatus,
    TransportErrorKind, MAX_RESPONSE_BODY_CHARS,
};
use crate::registry::{RegistryConfig, SubscriptionRegistry};
use crate::retry::RetryPolicy;
use crate::store::{DeliveryLog, DeliveryQueue, Stores};
use crate::validation;

/// `User-Agent` sent with every delivery.
pub const USER_AGENT: &str = concat!("courier-webhooks/", env!("CARGO_PKG_VERSION"));

pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_EVENT_ID: &str = "X-Webhook-Event-Id";
pub const HEADER_DELIVERY_ID: &str = "X-Webhook-Delivery-Id";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default slack added to the request timeout before a claim counts as stale.
pub const DEFAULT_CLAIM_MARGIN: Duration = Duration::from_secs(30);

/// Default number of deliveries claimed per `run_once`.
pub const DEFAULT_BATCH_SIZE: usize = 32;

pub const REASON_ENDPOINT_DISABLED: &str = "endpoint disabled";
pub const REASON_ENDPOINT_NOT_FOUND: &str = "endpoint not found";

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    request_timeout: Duration,
    claim_margin: Duration,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            claim_margin: DEFAULT_CLAIM_MARGIN,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Extra time past the request timeout before an in-flight claim is
    /// considered abandoned.
    #[must_use]
    pub fn with_claim_margin(mut self, margin: Duration) -> Self {
        self.claim_margin = margin;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn claim_margin(&self) -> Duration {
        self.claim_margin
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// What happened to a claimed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Succeeded,
    Retrying { next_attempt_at: DateTime<Utc> },
    FailedTerminal { reason: String },
    /// The delivery was no longer in flight when the transition was applied.
    Superseded,
    /// Stale claim released without a logged attempt.
    Released,
}

/// Result of one HTTP call, before it is logged.
struct CallResult {
    response_code: Option<u16>,
    response_body: Option<String>,
    failure: Option<AttemptFailure>,
    latency_ms: i32,
}

/// Delivery engine shared by workers and the management API.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SubscriptionRegistry,
    queue: Arc<dyn DeliveryQueue>,
    log: Arc<dyn DeliveryLog>,
    http_client: Client,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(
        stores: Stores,
        registry_config: RegistryConfig,
        config: DispatcherConfig,
    ) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            registry: SubscriptionRegistry::new(stores.endpoints, registry_config),
            queue: stores.queue,
            log: stores.log,
            http_client,
            config,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn DeliveryQueue> {
        &self.queue
    }

    #[must_use]
    pub fn log(&self) -> &Arc<dyn DeliveryLog> {
        &self.log
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Create one pending delivery per enabled endpoint subscribed to the
    /// event's type. No HTTP calls are made here.
    ///
    /// Re-submitting an event id is a no-op for endpoints that already have
    /// a delivery for it. Returns the deliveries created by this call.
    pub async fn submit_event(&self, event: &Event) -> Result<Vec<Delivery>, WebhookError> {
        validation::validate_event_type(&event.event_type)?;

        let endpoints = self.registry.resolve(&event.event_type).await?;
        if endpoints.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.id,
                event_type = %event.event_type,
                "No enabled endpoints subscribe to event type"
            );
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            match self.queue.enqueue(Delivery::new(event, endpoint.id, now)).await? {
                Some(delivery) => created.push(delivery),
                None => tracing::debug!(
                    target: "webhook_delivery",
                    event_id = %event.id,
                    endpoint_id = %endpoint.id,
                    "Delivery already exists for event and endpoint"
                ),
            }
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.id,
            event_type = %event.event_type,
            endpoint_count = endpoints.len(),
            created = created.len(),
            "Event enqueued for delivery"
        );

        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Claim up to `limit` due deliveries.
    pub async fn claim_due(&self, limit: usize) -> Result<Vec<Delivery>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.queue.dequeue_due(limit, Utc::now()).await
    }

    /// Claim one batch of due deliveries and process them concurrently.
    ///
    /// Returns the number of deliveries processed. A storage failure is
    /// returned after the whole batch has been attempted; deliveries it left
    /// in flight are recovered by [`Dispatcher::sweep_stale`].
    pub async fn run_once(&self) -> Result<usize, StorageError> {
        let claimed = self.claim_due(self.config.batch_size).await?;
        let count = claimed.len();
        if count == 0 {
            return Ok(0);
        }

        tracing::debug!(target: "webhook_delivery", count, "Claimed due deliveries");

        let results = join_all(claimed.into_iter().map(|d| self.process(d))).await;
        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(count)
    }

    /// Execute one attempt for a claimed delivery and apply the result.
    ///
    /// The endpoint is read once before the request is signed. If it is
    /// missing or disabled at that point the delivery fails terminally with
    /// no HTTP call, even when the disable landed after the claim. Once the
    /// request is on the wire a disable no longer cancels it; it only stops
    /// the reschedule.
    pub async fn process(&self, delivery: Delivery) -> Result<DeliveryOutcome, StorageError> {
        let endpoint = match self.registry.find(delivery.endpoint_id).await? {
            Some(endpoint) if endpoint.enabled => endpoint,
            Some(_) => {
                return self
                    .finish_without_call(&delivery, REASON_ENDPOINT_DISABLED)
                    .await;
            }
            None => {
                return self
                    .finish_without_call(&delivery, REASON_ENDPOINT_NOT_FOUND)
                    .await;
            }
        };

        let attempt_number = delivery.attempt_count + 1;
        let body = crypto::canonical_json(&delivery.payload);
        let signature = crypto::sign(&endpoint.secret, &body, Utc::now().timestamp());

        let attempted_at = Utc::now();
        let result = self.send(&delivery, &endpoint, &signature, body).await;

        let attempt = DeliveryAttempt {
            id: Uuid::new_v4(),
            delivery_id: delivery.id,
            attempt_number,
            signature: signature.header_value(),
            signed_at: signature.timestamp,
            response_code: result.response_code,
            transport_error: match &result.failure {
                Some(AttemptFailure::Transport { kind, .. }) => Some(*kind),
                _ => None,
            },
            error: result.failure.as_ref().map(ToString::to_string),
            response_body: result.response_body,
            latency_ms: result.latency_ms,
            attempted_at,
        };
        self.log.append(attempt).await?;

        match &result.failure {
            None => tracing::info!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                event_id = %delivery.event_id,
                event_type = %delivery.event_type,
                response_code = ?result.response_code,
                latency_ms = result.latency_ms,
                attempt_number,
                "Webhook delivery succeeded"
            ),
            Some(failure) => tracing::warn!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                event_id = %delivery.event_id,
                event_type = %delivery.event_type,
                error = %failure,
                retryable = failure.is_retryable(),
                latency_ms = result.latency_ms,
                attempt_number,
                "Webhook delivery failed"
            ),
        }

        self.apply_outcome(&delivery, attempt_number, result.failure)
            .await
    }

    /// Execute the HTTP POST.
    async fn send(
        &self,
        delivery: &Delivery,
        endpoint: &Endpoint,
        signature: &crypto::Signature,
        body: Vec<u8>,
    ) -> CallResult {
        let start = Instant::now();
        let result = self
            .http_client
            .post(&endpoint.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(HEADER_SIGNATURE, signature.header_value())
            .header(HEADER_TIMESTAMP, signature.timestamp.to_string())
            .header(HEADER_EVENT, delivery.event_type.as_str())
            .header(HEADER_EVENT_ID, delivery.event_id.to_string())
            .header(HEADER_DELIVERY_ID, delivery.id.to_string())
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let response_body: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_RESPONSE_BODY_CHARS)
                    .collect();
                let latency_ms = elapsed_ms(start);

                CallResult {
                    response_code: Some(status),
                    response_body: (!response_body.is_empty()).then_some(response_body),
                    failure: (!(200..300).contains(&status))
                        .then_some(AttemptFailure::Http { status }),
                    latency_ms,
                }
            }
            Err(e) => {
                let (kind, message) = if e.is_timeout() {
                    (
                        TransportErrorKind::Timeout,
                        format!(
                            "Request timeout ({}s)",
                            self.config.request_timeout.as_secs_f64()
                        ),
                    )
                } else if e.is_connect() {
                    (TransportErrorKind::Connect, format!("Connection failed: {e}"))
                } else {
                    (TransportErrorKind::Request, format!("Request error: {e}"))
                };

                CallResult {
                    response_code: None,
                    response_body: None,
                    failure: Some(AttemptFailure::Transport { kind, message }),
                    latency_ms: elapsed_ms(start),
                }
            }
        }
    }

    /// Apply the queue transition for a logged attempt.
    async fn apply_outcome(
        &self,
        delivery: &Delivery,
        attempt_number: i32,
        failure: Option<AttemptFailure>,
    ) -> Result<DeliveryOutcome, StorageError> {
        let Some(failure) = failure else {
            return self
                .finish(delivery, TerminalStatus::Succeeded, None, DeliveryOutcome::Succeeded)
                .await;
        };

        if !failure.is_retryable() {
            let reason = failure.to_string();
            return self
                .finish(
                    delivery,
                    TerminalStatus::FailedTerminal,
                    Some(&reason),
                    DeliveryOutcome::FailedTerminal {
                        reason: reason.clone(),
                    },
                )
                .await;
        }

        let policy = &self.config.retry;
        if !policy.should_retry(attempt_number) {
            let reason = format!("{failure} (retries exhausted after {attempt_number} attempts)");
            tracing::warn!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                attempt_number,
                "Webhook delivery retries exhausted"
            );
            return self
                .finish(
                    delivery,
                    TerminalStatus::FailedTerminal,
                    Some(&reason),
                    DeliveryOutcome::FailedTerminal {
                        reason: reason.clone(),
                    },
                )
                .await;
        }

        // Disabling an endpoint short-circuits the remaining retries.
        let blocked = match self.registry.find(delivery.endpoint_id).await? {
            Some(endpoint) if endpoint.enabled => None,
            Some(_) => Some(REASON_ENDPOINT_DISABLED),
            None => Some(REASON_ENDPOINT_NOT_FOUND),
        };
        if let Some(reason) = blocked {
            return self
                .finish(
                    delivery,
                    TerminalStatus::FailedTerminal,
                    Some(reason),
                    DeliveryOutcome::FailedTerminal {
                        reason: reason.to_string(),
                    },
                )
                .await;
        }

        let next_attempt_at =
            policy.next_attempt_at(Utc::now(), attempt_number, delivery.next_attempt_at);
        let error = failure.to_string();
        if !self
            .queue
            .reschedule(delivery.id, next_attempt_at, &error)
            .await?
        {
            return Ok(self.superseded(delivery));
        }

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            attempt_number,
            next_attempt_at = %next_attempt_at,
            "Webhook delivery scheduled for retry"
        );
        Ok(DeliveryOutcome::Retrying { next_attempt_at })
    }

    async fn finish_without_call(
        &self,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<DeliveryOutcome, StorageError> {
        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %delivery.endpoint_id,
            reason,
            "Webhook delivery abandoned without an attempt"
        );
        self.finish(
            delivery,
            TerminalStatus::FailedTerminal,
            Some(reason),
            DeliveryOutcome::FailedTerminal {
                reason: reason.to_string(),
            },
        )
        .await
    }

    async fn finish(
        &self,
        delivery: &Delivery,
        status: TerminalStatus,
        error: Option<&str>,
        outcome: DeliveryOutcome,
    ) -> Result<DeliveryOutcome, StorageError> {
        if self.queue.complete(delivery.id, status, error).await? {
            Ok(outcome)
        } else {
            Ok(self.superseded(delivery))
        }
    }

    fn superseded(&self, delivery: &Delivery) -> DeliveryOutcome {
        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            "Delivery no longer in flight, transition skipped"
        );
        DeliveryOutcome::Superseded
    }

    // -----------------------------------------------------------------------
    // Stale claim recovery
    // -----------------------------------------------------------------------

    /// Recover deliveries whose claim outlived the request timeout plus the
    /// claim margin.
    pub async fn sweep_stale(&self) -> Result<usize, StorageError> {
        self.sweep_stale_at(Utc::now()).await
    }

    /// [`Dispatcher::sweep_stale`] evaluated at `now`.
    ///
    /// If an attempt was logged under the stale claim its outcome is
    /// applied; otherwise the claim is released back to pending.
    pub async fn sweep_stale_at(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let window = chrono::Duration::from_std(self.config.request_timeout + self.config.claim_margin)
            .unwrap_or_else(|_| chrono::Duration::minutes(1));
        let stale = self.queue.stale_claims(now - window).await?;

        let mut recovered = 0;
        for delivery in stale {
            let Some(claimed_at) = delivery.claimed_at else {
                continue;
            };

            let history = self.log.history(delivery.id).await?;
            let logged = history
                .last()
                .filter(|a| a.attempt_number == delivery.attempt_count && a.attempted_at >= claimed_at);

            let outcome = match logged {
                Some(attempt) => {
                    self.apply_outcome(&delivery, attempt.attempt_number, attempt.failure())
                        .await?
                }
                None if self.queue.release_claim(delivery.id, claimed_at).await? => {
                    DeliveryOutcome::Released
                }
                None => DeliveryOutcome::Superseded,
            };

            if outcome != DeliveryOutcome::Superseded {
                recovered += 1;
            }
            tracing::warn!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                claimed_at = %claimed_at,
                outcome = ?outcome,
                "Recovered stale delivery claim"
            );
        }

        Ok(recovered)
    }
}

fn elapsed_ms(start: Instant) -> i32 {
    i32::try_from(start.elapsed().as_millis()).unwrap_or(i32::MAX)
}
