//! HTTP handlers for the webhook management API.

pub mod deliveries;
pub mod endpoints;
pub mod events;
