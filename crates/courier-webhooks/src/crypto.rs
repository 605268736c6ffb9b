//! Cryptographic operations for webhook payload signing.
//!
//! - Canonical JSON serialization of event payloads (the signing input)
//! - HMAC-SHA256 signatures over `{timestamp}.{body}`
//! - Signing secret generation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Scheme tag prepended to the hex digest in the `X-Webhook-Signature` header.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Prefix of generated signing secrets.
pub const SECRET_PREFIX: &str = "whsec_";

/// Default replay window receivers should enforce (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Number of random bytes in a generated secret.
const SECRET_BYTES: usize = 32;

/// SHA-256 output length.
const DIGEST_LEN: usize = 32;

/// A computed payload signature together with the timestamp it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Unix seconds included in the signed content.
    pub timestamp: i64,
    /// Hex-encoded HMAC-SHA256 digest.
    pub digest: String,
}

impl Signature {
    /// Value for the `X-Webhook-Signature` header.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("{SIGNATURE_PREFIX}{}", self.digest)
    }
}

// ---------------------------------------------------------------------------
// Canonical payload
// ---------------------------------------------------------------------------

/// Serialize a JSON value deterministically.
///
/// Object keys are sorted at every depth and no whitespace is emitted, so
/// the same logical payload always yields the same bytes regardless of how
/// the map was built or stored.
#[must_use]
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(Value::from(key.as_str()).to_string().as_bytes());
                out.push(b':');
                write_canonical(val, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        // Display for scalars is compact JSON.
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}

// ---------------------------------------------------------------------------
// HMAC-SHA256 payload signing
// ---------------------------------------------------------------------------

fn compute_mac(secret: &str, timestamp: i64, payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    digest
}

/// Sign a canonical payload.
///
/// The signature covers `{timestamp}.{payload}` so that a captured request
/// cannot be replayed outside the receiver's freshness window.
#[must_use]
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> Signature {
    Signature {
        timestamp,
        digest: hex::encode(compute_mac(secret, timestamp, payload)),
    }
}

/// Verify a signature using constant-time comparison.
///
/// Accepts either the header form (`sha256=<hex>`) or bare hex. Anything
/// that does not decode to a SHA-256 digest fails closed.
#[must_use]
pub fn verify(secret: &str, payload: &[u8], timestamp: i64, signature: &str) -> bool {
    let hex_digest = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);

    let Ok(provided) = hex::decode(hex_digest) else {
        return false;
    };
    if provided.len() != DIGEST_LEN {
        return false;
    }

    let expected = compute_mac(secret, timestamp, payload);
    constant_time_eq(&provided, &expected)
}

/// Receiver-side check: signature valid and `timestamp` within `tolerance_secs`
/// of `now` (either direction).
///
/// `timestamp` usually comes straight from a request header, so any `i64`
/// is handled without overflow.
#[must_use]
pub fn verify_fresh(
    secret: &str,
    payload: &[u8],
    timestamp: i64,
    signature: &str,
    now: i64,
    tolerance_secs: i64,
) -> bool {
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return false;
    }
    verify(secret, payload, timestamp, signature)
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// Secret generation
// ---------------------------------------------------------------------------

/// Generate a new endpoint signing secret from the OS CSPRNG.
#[must_use]
pub fn generate_secret() -> String {
    use rand::rngs::OsRng;
    use rand::RngCore;

    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", BASE64_URL.encode(bytes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
