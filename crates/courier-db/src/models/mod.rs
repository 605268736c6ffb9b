//! Row models for the webhook tables.

pub mod webhook_delivery;
pub mod webhook_delivery_attempt;
pub mod webhook_endpoint;

pub use webhook_delivery::{CreateWebhookDelivery, WebhookDelivery};
pub use webhook_delivery_attempt::{CreateWebhookDeliveryAttempt, WebhookDeliveryAttempt};
pub use webhook_endpoint::{CreateWebhookEndpoint, UpdateWebhookEndpoint, WebhookEndpoint};
