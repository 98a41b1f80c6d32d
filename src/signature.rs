//! HMAC signing/verification for outbound webhook payloads, and
//! at-rest hashing for subscription secrets.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("secret is empty")]
    EmptySecret,
    #[error("invalid timestamp header: {0}")]
    MalformedTimestampHeader(String),
    #[error("secret hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
}

/// `HMAC-SHA256(secret, payload)`, base64-encoded, per the
/// `X-Webhook-Signature` header contract.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::EmptySecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(payload);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verifies a base64 signature against freshly computed HMAC output
/// using a constant-time comparison, so a timing side channel cannot
/// leak how many leading bytes matched.
pub fn verify(secret: &str, payload: &[u8], signature_b64: &str) -> bool {
    let Ok(expected) = sign(secret, payload) else {
        return false;
    };
    let (Ok(expected_bytes), Ok(actual_bytes)) = (STANDARD.decode(&expected), STANDARD.decode(signature_b64)) else {
        return false;
    };
    expected_bytes.ct_eq(&actual_bytes).into()
}

/// Bcrypt-equivalent work-factor hash of a subscription secret, for
/// at-rest storage and for confirming an operator-supplied secret
/// during rotation.
pub fn hash_secret(secret: &str) -> Result<String, SignatureError> {
    Ok(bcrypt::hash(secret, bcrypt::DEFAULT_COST)?)
}

pub fn verify_secret_hash(secret: &str, hash: &str) -> bool {
    bcrypt::verify(secret, hash).unwrap_or(false)
}

/// Builds the `t=<millis>,n=<nonce>` value for `X-Webhook-Timestamp`.
pub fn format_timestamp_header(millis: i64, nonce: &str) -> String {
    format!("t={millis},n={nonce}")
}

/// Parses `t=<millis>,n=<nonce>` back into its components.
pub fn parse_timestamp_header(header: &str) -> Result<(i64, String), SignatureError> {
    let mut millis = None;
    let mut nonce = None;
    for part in header.split(',') {
        if let Some(value) = part.strip_prefix("t=") {
            millis = value.parse::<i64>().ok();
        } else if let Some(value) = part.strip_prefix("n=") {
            nonce = Some(value.to_string());
        }
    }
    match (millis, nonce) {
        (Some(millis), Some(nonce)) => Ok((millis, nonce)),
        _ => Err(SignatureError::MalformedTimestampHeader(header.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signature = sign("my-secret", b"payload-bytes").unwrap();
        assert!(verify("my-secret", b"payload-bytes", &signature));
    }

    #[test]
    fn verify_rejects_mutated_payload() {
        let signature = sign("my-secret", b"payload-bytes").unwrap();
        assert!(!verify("my-secret", b"payload-bytfs", &signature));
    }

    #[test]
    fn verify_rejects_mutated_signature() {
        let mut signature = sign("my-secret", b"payload-bytes").unwrap();
        signature.pop();
        signature.push(if signature.ends_with('A') { 'B' } else { 'A' });
        assert!(!verify("my-secret", b"payload-bytes", &signature));
    }

    #[test]
    fn timestamp_header_round_trips() {
        let header = format_timestamp_header(1_700_000_000_000, "abc123");
        let (millis, nonce) = parse_timestamp_header(&header).unwrap();
        assert_eq!(millis, 1_700_000_000_000);
        assert_eq!(nonce, "abc123");
    }

    #[test]
    fn secret_hash_round_trips() {
        let hash = hash_secret("super-secret").unwrap();
        assert!(verify_secret_hash("super-secret", &hash));
        assert!(!verify_secret_hash("wrong-secret", &hash));
    }
}
