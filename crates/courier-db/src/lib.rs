//! # courier-db
//!
//! PostgreSQL persistence for the courier webhook delivery service.
//!
//! Provides `SQLx` row models for the three persisted tables and embedded
//! migrations:
//!
//! - `webhook_endpoints`: registered delivery targets
//! - `webhook_deliveries`: one row per (event, endpoint), the durable work queue
//! - `webhook_delivery_attempts`: append-only attempt log
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_db::{connect, run_migrations};
//!
//! let pool = connect("postgres://localhost/courier", 10).await?;
//! run_migrations(&pool).await?;
//! ```

pub mod error;
pub mod migrations;
pub mod models;

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

pub use error::DbError;
pub use migrations::run_migrations;

/// Open a connection pool against `database_url`.
///
/// # Errors
///
/// Returns `DbError::ConnectionFailed` if the database cannot be reached
/// within the acquire timeout.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(DbError::ConnectionFailed)?;

    tracing::info!(max_connections, "Database connection pool established");
    Ok(pool)
}
