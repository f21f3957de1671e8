use crate::types::{Headers, SignatureCheck};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const GITHUB_HMAC: &str = "github-hmac";
pub const STANDARD_WEBHOOKS: &str = "standard-webhooks";

/// Check whichever known signature scheme the request carries against the
/// webhook's secret. `None` when the request is unsigned.
pub fn check(secret: &str, headers: &Headers, body: &[u8]) -> Option<SignatureCheck> {
    if let Some(sig) = headers.get("x-hub-signature-256") {
        return Some(SignatureCheck {
            scheme: GITHUB_HMAC,
            valid: verify_github_hmac(secret, body, sig),
        });
    }

    if let (Some(msg_id), Some(timestamp), Some(sig)) = (
        headers.get("webhook-id"),
        headers.get("webhook-timestamp"),
        headers.get("webhook-signature"),
    ) {
        return Some(SignatureCheck {
            scheme: STANDARD_WEBHOOKS,
            valid: verify_standard_webhooks(secret, body, msg_id, timestamp, sig),
        });
    }

    None
}

/// Verify a GitHub-style HMAC signature.
/// Expects header value like "sha256=<hex>".
pub fn verify_github_hmac(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(expected_hex) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Verify a Standard Webhooks signature.
/// Header format: "v1,<base64>", possibly several separated by spaces.
/// Signed payload: "<msg-id>.<timestamp>.<body>"
pub fn verify_standard_webhooks(
    secret: &str,
    body: &[u8],
    msg_id: &str,
    timestamp: &str,
    signature_header: &str,
) -> bool {
    let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
    let secret_bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap_or_else(|_| secret.as_bytes().to_vec());

    let Ok(mut mac) = HmacSha256::new_from_slice(&secret_bytes) else {
        return false;
    };
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    let computed = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    signature_header
        .split_whitespace()
        .filter_map(|sig| sig.strip_prefix("v1,"))
        .any(|sig| sig == computed)
}
