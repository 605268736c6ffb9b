//! Domain types and API request/response shapes for webhook delivery.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Maximum number of characters of a response body kept on an attempt.
pub const MAX_RESPONSE_BODY_CHARS: usize = 4096;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// A registered delivery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: Uuid,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a new endpoint.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct NewEndpoint {
    /// HTTPS URL that will receive event POSTs.
    #[validate(length(min = 1, max = 2048))]
    pub url: String,

    /// Event type filters: exact types, `prefix.*`, or `*`.
    #[validate(length(min = 1))]
    pub event_types: Vec<String>,

    /// Signing secret. Generated when omitted.
    #[validate(length(min = 16, max = 512))]
    pub secret: Option<String>,

    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

/// Partial update of an endpoint's configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct EndpointUpdate {
    #[validate(length(min = 1, max = 2048))]
    pub url: Option<String>,

    #[validate(length(min = 1))]
    pub event_types: Option<Vec<String>>,

    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

/// Endpoint as returned by the API. The secret is never included.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointResponse {
    pub id: Uuid,
    pub url: String,
    pub event_types: Vec<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Endpoint> for EndpointResponse {
    fn from(e: Endpoint) -> Self {
        Self {
            id: e.id,
            url: e.url,
            event_types: e.event_types,
            description: e.description,
            enabled: e.enabled,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

/// Registration response: the endpoint plus its signing secret, shown once.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointCreatedResponse {
    #[serde(flatten)]
    pub endpoint: EndpointResponse,
    pub secret: String,
}

/// Secret rotation response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecretResponse {
    pub endpoint_id: Uuid,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointListResponse {
    pub items: Vec<EndpointResponse>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A domain event to be fanned out to subscribed endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// New event with a fresh id, occurring now.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// Event submission over HTTP. Id and timestamp default to new values.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SubmitEventRequest {
    pub id: Option<Uuid>,

    #[validate(length(min = 1, max = 128))]
    pub event_type: String,

    #[schema(value_type = Object)]
    pub payload: serde_json::Value,

    pub occurred_at: Option<DateTime<Utc>>,
}

impl From<SubmitEventRequest> for Event {
    fn from(req: SubmitEventRequest) -> Self {
        Self {
            id: req.id.unwrap_or_else(Uuid::new_v4),
            event_type: req.event_type,
            payload: req.payload,
            occurred_at: req.occurred_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitEventResponse {
    pub event_id: Uuid,
    /// Deliveries newly created by this submission.
    pub deliveries: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------------

/// Lifecycle status of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its first attempt.
    Pending,
    /// Claimed by a dispatcher.
    InFlight,
    Succeeded,
    /// Attempted at least once and waiting for a retry.
    FailedRetryable,
    FailedTerminal,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::FailedRetryable => "failed_retryable",
            Self::FailedTerminal => "failed_terminal",
        }
    }

    /// Succeeded or failed terminally: no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }

    /// Derive the reported status from the stored status and attempt count.
    #[must_use]
    pub fn from_stored(stored: StoredStatus, attempt_count: i32) -> Self {
        match stored {
            StoredStatus::Pending if attempt_count > 0 => Self::FailedRetryable,
            StoredStatus::Pending => Self::Pending,
            StoredStatus::InFlight => Self::InFlight,
            StoredStatus::Succeeded => Self::Succeeded,
            StoredStatus::FailedTerminal => Self::FailedTerminal,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "succeeded" => Ok(Self::Succeeded),
            "failed_retryable" => Ok(Self::FailedRetryable),
            "failed_terminal" => Ok(Self::FailedTerminal),
            other => Err(format!("Unknown delivery status: {other}")),
        }
    }
}

/// Status values as persisted. Retryable failures are stored as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoredStatus {
    Pending,
    InFlight,
    Succeeded,
    FailedTerminal,
}

impl StoredStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::FailedTerminal => "failed_terminal",
        }
    }
}

impl FromStr for StoredStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "succeeded" => Ok(Self::Succeeded),
            "failed_terminal" => Ok(Self::FailedTerminal),
            other => Err(format!("Unknown stored delivery status: {other}")),
        }
    }
}

/// Terminal outcome passed to `DeliveryQueue::complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded,
    FailedTerminal,
}

impl From<TerminalStatus> for StoredStatus {
    fn from(t: TerminalStatus) -> Self {
        match t {
            TerminalStatus::Succeeded => Self::Succeeded,
            TerminalStatus::FailedTerminal => Self::FailedTerminal,
        }
    }
}

/// One (event, endpoint) delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub event_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub status: StoredStatus,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// A fresh pending delivery of `event` to `endpoint_id`, due at `now`.
    #[must_use]
    pub fn new(event: &Event, endpoint_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.id,
            endpoint_id,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            occurred_at: event.occurred_at,
            status: StoredStatus::Pending,
            attempt_count: 0,
            next_attempt_at: now,
            last_error: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Status as reported to callers.
    #[must_use]
    pub fn reported_status(&self) -> DeliveryStatus {
        DeliveryStatus::from_stored(self.status, self.attempt_count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(d: Delivery) -> Self {
        let status = d.reported_status();
        Self {
            id: d.id,
            event_id: d.event_id,
            endpoint_id: d.endpoint_id,
            event_type: d.event_type,
            payload: d.payload,
            occurred_at: d.occurred_at,
            status,
            attempt_count: d.attempt_count,
            next_attempt_at: (!status.is_terminal()).then_some(d.next_attempt_at),
            last_error: d.last_error,
            created_at: d.created_at,
            completed_at: d.completed_at,
        }
    }
}

/// Query parameters for listing an endpoint's deliveries.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeliveryListQuery {
    /// Filter by reported status.
    pub status: Option<DeliveryStatus>,
    /// Max results (1-100, default 20).
    pub limit: Option<i64>,
    /// Offset for pagination.
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryListResponse {
    pub items: Vec<DeliveryResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ---------------------------------------------------------------------------
// Attempts
// ---------------------------------------------------------------------------

/// Classification of a failed HTTP call that never produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
}

impl TransportErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
        }
    }
}

impl FromStr for TransportErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "connect" => Ok(Self::Connect),
            "request" => Ok(Self::Request),
            other => Err(format!("Unknown transport error kind: {other}")),
        }
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptFailure {
    #[error("{message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("HTTP {status}")]
    Http { status: u16 },
}

impl AttemptFailure {
    /// Transport errors, 5xx and 429 are worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status } => *status >= 500 || *status == 429,
        }
    }
}

/// One logged HTTP call for a delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub delivery_id: Uuid,
    /// 1-based.
    pub attempt_number: i32,
    /// `X-Webhook-Signature` value sent.
    pub signature: String,
    /// Unix seconds covered by the signature.
    pub signed_at: i64,
    pub response_code: Option<u16>,
    pub transport_error: Option<TransportErrorKind>,
    pub error: Option<String>,
    pub response_body: Option<String>,
    pub latency_ms: i32,
    pub attempted_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    /// The outcome this attempt recorded: `None` for success.
    #[must_use]
    pub fn failure(&self) -> Option<AttemptFailure> {
        if let Some(kind) = self.transport_error {
            return Some(AttemptFailure::Transport {
                kind,
                message: self.error.clone().unwrap_or_default(),
            });
        }
        match self.response_code {
            Some(code) if (200..300).contains(&code) => None,
            Some(code) => Some(AttemptFailure::Http { status: code }),
            None => Some(AttemptFailure::Transport {
                kind: TransportErrorKind::Request,
                message: self.error.clone().unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryAttemptResponse {
    pub id: Uuid,
    pub attempt_number: i32,
    pub signature: String,
    pub signed_at: i64,
    pub response_code: Option<u16>,
    pub transport_error: Option<TransportErrorKind>,
    pub error: Option<String>,
    pub response_body: Option<String>,
    pub latency_ms: i32,
    pub attempted_at: DateTime<Utc>,
}

impl From<DeliveryAttempt> for DeliveryAttemptResponse {
    fn from(a: DeliveryAttempt) -> Self {
        Self {
            id: a.id,
            attempt_number: a.attempt_number,
            signature: a.signature,
            signed_at: a.signed_at,
            response_code: a.response_code,
            transport_error: a.transport_error,
            error: a.error,
            response_body: a.response_body,
            latency_ms: a.latency_ms,
            attempted_at: a.attempted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryAttemptListResponse {
    pub delivery_id: Uuid,
    pub items: Vec<DeliveryAttemptResponse>,
}
