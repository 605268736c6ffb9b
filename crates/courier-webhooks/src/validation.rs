//! URL validation and SSRF protection for webhook delivery endpoints.
//!
//! Validates webhook URLs against:
//! - Protocol requirements (HTTPS unless plain HTTP is allowed)
//! - SSRF protections (private/internal IP ranges, cloud metadata endpoints)
//! - Event type and subscription filter syntax

use std::net::IpAddr;

use crate::error::WebhookError;

/// Maximum length of an event type or filter.
pub const MAX_EVENT_TYPE_LEN: usize = 128;

/// Maximum number of filters on one endpoint.
pub const MAX_FILTERS_PER_ENDPOINT: usize = 64;

/// Maximum accepted URL length.
pub const MAX_URL_LEN: usize = 2048;

// ---------------------------------------------------------------------------
// URL validation
// ---------------------------------------------------------------------------

/// Validate a webhook delivery URL.
///
/// Checks:
/// 1. URL is parseable and not oversized
/// 2. Scheme is HTTPS (or HTTP if `allow_http` is true for dev/test)
/// 3. URL carries no credentials
/// 4. Host is not a private/internal address, unless `allow_private_hosts`
pub fn validate_webhook_url(
    url: &str,
    allow_http: bool,
    allow_private_hosts: bool,
) -> Result<(), WebhookError> {
    if url.len() > MAX_URL_LEN {
        return Err(WebhookError::InvalidUrl(format!(
            "URL exceeds {MAX_URL_LEN} characters"
        )));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_http => {}
        "http" => {
            return Err(WebhookError::InvalidUrl(
                "Webhook URLs must use HTTPS".to_string(),
            ));
        }
        scheme => {
            return Err(WebhookError::InvalidUrl(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(WebhookError::InvalidUrl(
            "Webhook URLs must not embed credentials".to_string(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("URL must have a host".to_string()))?;

    if !allow_private_hosts {
        validate_host_not_internal(host)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate that a host is not a private/internal address.
///
/// Blocks:
/// - Loopback addresses (127.0.0.0/8)
/// - Private networks (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16)
/// - Link-local (169.254.0.0/16, cloud metadata endpoints)
/// - CGNAT (100.64.0.0/10)
/// - IPv6 loopback, unspecified, unique-local and link-local
/// - Internal hostnames (localhost, *.internal, *.local)
pub fn validate_host_not_internal(host: &str) -> Result<(), WebhookError> {
    // url::Url keeps IPv6 literals bracketed
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(WebhookError::SsrfDetected(format!(
                "Destination host {host} is a private/internal address"
            )));
        }
    }

    let lower = bare.to_ascii_lowercase();
    if lower == "localhost"
        || lower.ends_with(".localhost")
        || lower == "metadata.google.internal"
        || lower.ends_with(".internal")
        || lower.ends_with(".local")
    {
        return Err(WebhookError::SsrfDetected(format!(
            "Destination host {host} is a restricted internal hostname"
        )));
    }

    Ok(())
}

/// Check if an IP address belongs to a private/internal range.
fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // CGNAT
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // fc00::/7 unique local
                || (first & 0xffc0) == 0xfe80 // fe80::/10 link local
                || v6.to_ipv4_mapped().is_some_and(|v4| is_internal_ip(&IpAddr::V4(v4)))
        }
    }
}

// ---------------------------------------------------------------------------
// Event type validation
// ---------------------------------------------------------------------------

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a concrete event type such as `order.created`.
pub fn validate_event_type(event_type: &str) -> Result<(), WebhookError> {
    if event_type.is_empty() || event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(WebhookError::Validation(format!(
            "Event type must be 1-{MAX_EVENT_TYPE_LEN} characters"
        )));
    }
    if !event_type.split('.').all(is_valid_segment) {
        return Err(WebhookError::Validation(format!(
            "Invalid event type: {event_type}"
        )));
    }
    Ok(())
}

/// Validate one subscription filter: `*`, an exact type, or `prefix.*`.
pub fn validate_event_filter(filter: &str) -> Result<(), WebhookError> {
    if filter == "*" {
        return Ok(());
    }
    let concrete = filter.strip_suffix(".*").unwrap_or(filter);
    validate_event_type(concrete)
        .map_err(|_| WebhookError::Validation(format!("Invalid event type filter: {filter}")))
}

/// Validate an endpoint's filter list. At least one filter is required.
pub fn validate_event_filters(filters: &[String]) -> Result<(), WebhookError> {
    if filters.is_empty() {
        return Err(WebhookError::Validation(
            "At least one event type is required".to_string(),
        ));
    }
    if filters.len() > MAX_FILTERS_PER_ENDPOINT {
        return Err(WebhookError::Validation(format!(
            "At most {MAX_FILTERS_PER_ENDPOINT} event types per endpoint"
        )));
    }
    filters.iter().try_for_each(|f| validate_event_filter(f))
}

/// Does `filter` select `event_type`?
#[must_use]
pub fn filter_matches(filter: &str, event_type: &str) -> bool {
    if filter == "*" {
        return true;
    }
    match filter.strip_suffix(".*") {
        Some(prefix) => event_type
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => filter == event_type,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
