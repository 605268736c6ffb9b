//! Webhook delivery service: wiring for configuration, logging, storage
//! selection and the HTTP surface.

pub mod app;
pub mod config;
pub mod health;
pub mod logging;

pub use app::{api_doc, build_router, open_storage, AppState, StorageBackend, Workers};
pub use config::{AppEnvironment, Config, ConfigError, WebhookSettings};
