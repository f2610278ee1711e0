//! Processor webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256>`. The signed
//! payload is `"{t}.{body}"`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{LifecycleError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Default allowed clock skew between processor and us, in seconds.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Verifies the processor's signature header.
///
/// The secret is held as a [`SecretString`] so it never shows up in debug
/// output.
pub struct SignatureVerifier {
    secret: SecretString,
    tolerance_seconds: i64,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<SecretString>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        }
    }

    pub fn with_tolerance_seconds(mut self, seconds: i64) -> Self {
        self.tolerance_seconds = seconds;
        self
    }

    /// Check `header` against `payload` as of `now`.
    ///
    /// # Errors
    ///
    /// `InvalidSignature` if the header is malformed, too old, or doesn't
    /// match. Any `v1` entry matching is enough (processors send several
    /// during secret rotation).
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<()> {
        let parts = parse_signature_header(header)?;

        // `t` is attacker controlled; an unrepresentable skew is out of tolerance
        let within = now
            .timestamp()
            .checked_sub(parts.timestamp)
            .map(i64::unsigned_abs)
            .is_some_and(|skew| skew <= self.tolerance_seconds.unsigned_abs());
        if !within {
            return Err(LifecycleError::invalid_signature("timestamp outside tolerance"));
        }

        let expected = self.compute(parts.timestamp, payload)?;

        let matched = parts.signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|provided| bool::from(expected.ct_eq(&provided)))
                .unwrap_or(false)
        });

        if !matched {
            return Err(LifecycleError::invalid_signature("signature mismatch"));
        }
        Ok(())
    }

    /// Header value for `payload` signed at `timestamp`. For tests and local
    /// tooling that replays events.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let mac = self.compute(timestamp, payload)?;
        Ok(format!("t={timestamp},v1={}", hex::encode(mac)))
    }

    fn compute(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| LifecycleError::invalid_signature("unusable signing secret"))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_seconds", &self.tolerance_seconds)
            .finish()
    }
}

struct SignatureParts {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| LifecycleError::invalid_signature("invalid signature header format"))?;

        match key.trim() {
            "t" => timestamp = value.trim().parse().ok(),
            "v1" => signatures.push(value.trim().to_string()),
            _ => {} // Ignore other schemes
        }
    }

    let timestamp = timestamp.ok_or_else(|| LifecycleError::invalid_signature("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(LifecycleError::invalid_signature("missing v1 signature"));
    }

    Ok(SignatureParts {
        timestamp,
        signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_accepts_valid_signature() {
        let verifier = SignatureVerifier::new("whsec_test".to_string());
        let body = br#"{"id":"evt_1"}"#;
        let header = verifier.sign(body, now().timestamp()).unwrap();

        assert!(verifier.verify(body, &header, now()).is_ok());
    }

    #[test]
    fn test_rejects_tampered_body_and_wrong_secret() {
        let verifier = SignatureVerifier::new("whsec_test".to_string());
        let header = verifier.sign(b"original", now().timestamp()).unwrap();
        assert!(verifier.verify(b"tampered", &header, now()).is_err());

        let other = SignatureVerifier::new("whsec_other".to_string());
        assert!(other.verify(b"original", &header, now()).is_err());
    }

    #[test]
    fn test_rejects_stale_timestamp() {
        let verifier = SignatureVerifier::new("whsec_test".to_string());
        let signed_at = now().timestamp() - 301;
        let header = verifier.sign(b"body", signed_at).unwrap();

        let err = verifier.verify(b"body", &header, now()).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSignature(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_extreme_timestamps_are_outside_tolerance() {
        let verifier = SignatureVerifier::new("whsec_test".to_string());

        for header in ["t=-9223372036854775808,v1=00", "t=9223372036854775807,v1=00"] {
            let err = verifier.verify(b"{}", header, now()).unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidSignature(_)), "{header}");
        }
    }

    #[test]
    fn test_any_v1_signature_may_match() {
        let verifier = SignatureVerifier::new("whsec_test".to_string());
        let ts = now().timestamp();
        let valid = verifier.sign(b"body", ts).unwrap();
        let valid_sig = valid.split("v1=").nth(1).unwrap();
        let header = format!("t={ts},v1=deadbeef,v0=ignored,v1={valid_sig}");

        assert!(verifier.verify(b"body", &header, now()).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        let verifier = SignatureVerifier::new("whsec_test".to_string());
        for header in ["", "garbage", "t=123", "v1=abcd", "t=abc,v1=abcd"] {
            assert!(verifier.verify(b"body", header, now()).is_err(), "{header}");
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let verifier = SignatureVerifier::new("whsec_super_secret".to_string());
        assert!(!format!("{verifier:?}").contains("super_secret"));
    }
}
