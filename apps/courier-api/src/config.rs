//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: a malformed value stops startup with a message that
//! names the offending variable.

use std::env;
use std::time::Duration;

use courier_webhooks::{DispatcherConfig, RegistryConfig, RetryPolicy, WorkerConfig};
use thiserror::Error;

/// Application environment mode.
///
/// Production refuses settings that are only safe on a developer machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parse an `APP_ENV` value. Defaults to `Development` if unrecognized.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Failed to parse port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Delivery tuning read from `WEBHOOK_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookSettings {
    pub max_attempts: i32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter: f64,
    pub request_timeout_secs: u64,
    /// Number of worker loops spawned by the service.
    pub workers: usize,
    /// In-flight deliveries per worker.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub allow_http: bool,
    pub allow_private_hosts: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_base_ms: 10_000,
            backoff_cap_ms: 3_600_000,
            backoff_jitter: 0.1,
            request_timeout_secs: 10,
            workers: 1,
            concurrency: 8,
            poll_interval_ms: 1000,
            batch_size: 32,
            allow_http: false,
            allow_private_hosts: false,
        }
    }
}

impl WebhookSettings {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.backoff_base_ms))
            .with_max_delay(Duration::from_millis(self.backoff_cap_ms))
            .with_jitter(self.backoff_jitter)
    }

    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::new()
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_batch_size(self.batch_size)
            .with_retry_policy(self.retry_policy())
    }

    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new()
            .with_allow_http(self.allow_http)
            .with_allow_private_hosts(self.allow_private_hosts)
    }

    #[must_use]
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_concurrency(self.concurrency)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnvironment,
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    /// PostgreSQL connection string. Deliveries are kept in memory when unset.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub webhooks: WebhookSettings,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for any unparsable value, or when production
    /// mode is combined with settings that allow private delivery targets.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// or `None` when unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|s| !s.is_empty());

        let app_env = var("APP_ENV")
            .map(|s| AppEnvironment::from_env_str(&s))
            .unwrap_or(AppEnvironment::Development);

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = var("PORT").unwrap_or_else(|| "8080".to_string()).parse()?;
        if port == 0 {
            return Err(ConfigError::InvalidValue {
                var: "PORT".to_string(),
                message: "Port must be between 1 and 65535".to_string(),
            });
        }

        let rust_log = var("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let database_url = var("DATABASE_URL");
        let database_max_connections = parse_or(&var, "DATABASE_MAX_CONNECTIONS", 10)?;

        let defaults = WebhookSettings::default();
        let webhooks = WebhookSettings {
            max_attempts: parse_or(&var, "WEBHOOK_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_base_ms: parse_or(&var, "WEBHOOK_BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            backoff_cap_ms: parse_or(&var, "WEBHOOK_BACKOFF_CAP_MS", defaults.backoff_cap_ms)?,
            backoff_jitter: parse_or(&var, "WEBHOOK_BACKOFF_JITTER", defaults.backoff_jitter)?,
            request_timeout_secs: parse_or(
                &var,
                "WEBHOOK_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            workers: parse_or(&var, "WEBHOOK_WORKERS", defaults.workers)?,
            concurrency: parse_or(&var, "WEBHOOK_CONCURRENCY", defaults.concurrency)?,
            poll_interval_ms: parse_or(
                &var,
                "WEBHOOK_POLL_INTERVAL_MS",
                defaults.poll_interval_ms,
            )?,
            batch_size: parse_or(&var, "WEBHOOK_BATCH_SIZE", defaults.batch_size)?,
            allow_http: parse_bool_or(&var, "WEBHOOK_ALLOW_HTTP", defaults.allow_http)?,
            allow_private_hosts: parse_bool_or(
                &var,
                "WEBHOOK_ALLOW_PRIVATE_HOSTS",
                defaults.allow_private_hosts,
            )?,
        };

        if webhooks.max_attempts < 1 {
            return Err(ConfigError::InvalidValue {
                var: "WEBHOOK_MAX_ATTEMPTS".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        if webhooks.backoff_cap_ms < webhooks.backoff_base_ms {
            return Err(ConfigError::InvalidValue {
                var: "WEBHOOK_BACKOFF_CAP_MS".to_string(),
                message: "Must not be smaller than WEBHOOK_BACKOFF_BASE_MS".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&webhooks.backoff_jitter) {
            return Err(ConfigError::InvalidValue {
                var: "WEBHOOK_BACKOFF_JITTER".to_string(),
                message: "Must be between 0.0 and 1.0".to_string(),
            });
        }
        if app_env.is_production() && webhooks.allow_private_hosts {
            return Err(ConfigError::InvalidValue {
                var: "WEBHOOK_ALLOW_PRIVATE_HOSTS".to_string(),
                message: "Private delivery targets are not allowed in production".to_string(),
            });
        }

        Ok(Self {
            app_env,
            host,
            port,
            rust_log,
            database_url,
            database_max_connections,
            webhooks,
        })
    }

    /// Get the server bind address as a socket address string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Development-only settings worth a warning at startup.
    pub fn insecure_settings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.webhooks.allow_http {
            warnings.push("WEBHOOK_ALLOW_HTTP is enabled: payloads may be sent in clear text".to_string());
        }
        if self.webhooks.allow_private_hosts {
            warnings.push(
                "WEBHOOK_ALLOW_PRIVATE_HOSTS is enabled: endpoints may target internal addresses"
                    .to_string(),
            );
        }
        if self.database_url.is_none() {
            warnings.push("DATABASE_URL is not set: deliveries are kept in memory only".to_string());
        }
        warnings
    }
}

fn parse_or<F, T>(var: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(var: &F, name: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                var: name.to_string(),
                message: format!("Expected a boolean, got '{other}'"),
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.app_env, AppEnvironment::Development);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.rust_log, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.webhooks, WebhookSettings::default());
    }

    #[test]
    fn test_webhook_overrides() {
        let config = load(&[
            ("WEBHOOK_MAX_ATTEMPTS", "5"),
            ("WEBHOOK_BACKOFF_BASE_MS", "500"),
            ("WEBHOOK_BACKOFF_CAP_MS", "60000"),
            ("WEBHOOK_BACKOFF_JITTER", "0"),
            ("WEBHOOK_WORKERS", "3"),
            ("WEBHOOK_ALLOW_HTTP", "true"),
            ("DATABASE_URL", "postgres://localhost/courier"),
        ])
        .unwrap();

        assert_eq!(config.webhooks.max_attempts, 5);
        assert_eq!(config.webhooks.workers, 3);
        assert!(config.webhooks.allow_http);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/courier"));

        let policy = config.webhooks.retry_policy();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(30), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = load(&[("WEBHOOK_BATCH_SIZE", "lots")]).unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_BATCH_SIZE"));
    }

    #[test]
    fn test_invalid_port() {
        assert!(matches!(
            load(&[("PORT", "http")]).unwrap_err(),
            ConfigError::InvalidPort(_)
        ));
        assert!(matches!(
            load(&[("PORT", "0")]).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_invalid_bool() {
        let err = load(&[("WEBHOOK_ALLOW_HTTP", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_ALLOW_HTTP"));
    }

    #[test]
    fn test_cap_below_base_rejected() {
        let err = load(&[
            ("WEBHOOK_BACKOFF_BASE_MS", "5000"),
            ("WEBHOOK_BACKOFF_CAP_MS", "100"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_BACKOFF_CAP_MS"));
    }

    #[test]
    fn test_production_rejects_private_hosts() {
        let err = load(&[
            ("APP_ENV", "production"),
            ("WEBHOOK_ALLOW_PRIVATE_HOSTS", "true"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_ALLOW_PRIVATE_HOSTS"));

        assert!(load(&[
            ("APP_ENV", "development"),
            ("WEBHOOK_ALLOW_PRIVATE_HOSTS", "true"),
        ])
        .is_ok());
    }

    #[test]
    fn test_app_environment_parse() {
        assert_eq!(AppEnvironment::from_env_str("PROD"), AppEnvironment::Production);
        assert_eq!(AppEnvironment::from_env_str("dev"), AppEnvironment::Development);
        assert_eq!(AppEnvironment::from_env_str("staging"), AppEnvironment::Development);
        assert_eq!(AppEnvironment::Production.to_string(), "production");
    }

    #[test]
    fn test_insecure_settings_reported() {
        let config = load(&[("WEBHOOK_ALLOW_HTTP", "1")]).unwrap();
        let warnings = config.insecure_settings();
        assert!(warnings.iter().any(|w| w.contains("WEBHOOK_ALLOW_HTTP")));
        assert!(warnings.iter().any(|w| w.contains("DATABASE_URL")));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingVar("DATABASE_URL".to_string());
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: DATABASE_URL"
        );
    }
}
