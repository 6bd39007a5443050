//! `Stripe-Signature` verification.
//!
//! The header is `t=<unix>,v1=<hex>[,v1=<hex>...]`. The signed payload is
//! `"{t}.{body}"`, keyed with the endpoint secret.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{BillingError, BillingResult};

pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| invalid("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(invalid("no v1 signature"));
    }
    if (now - timestamp).unsigned_abs() > tolerance.as_secs() {
        return Err(invalid("timestamp outside tolerance"));
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| invalid(&e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|signature| {
        hex::decode(signature).is_ok_and(|bytes| mac.clone().verify_slice(&bytes).is_ok())
    });
    if matched {
        Ok(())
    } else {
        Err(invalid("no matching signature"))
    }
}

fn invalid(reason: &str) -> BillingError {
    BillingError::InvalidSignature(reason.to_string())
}

#[cfg(test)]
pub(crate) fn sign_for_test(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const TOLERANCE: Duration = Duration::from_secs(300);
    const NOW: i64 = 1_760_000_000;

    #[test]
    fn accepts_a_valid_signature() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_for_test(body, SECRET, NOW - 10);
        assert!(verify_signature(body, &header, SECRET, TOLERANCE, NOW).is_ok());
    }

    #[test]
    fn any_v1_may_match() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_for_test(body, SECRET, NOW);
        let rotated = header.replacen("v1=", "v1=deadbeef,v1=", 1);
        assert!(verify_signature(body, &rotated, SECRET, TOLERANCE, NOW).is_ok());
    }

    #[test]
    fn rejects_tampering_and_stale_timestamps() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_for_test(body, SECRET, NOW);

        assert!(verify_signature(br#"{"id":"evt_2"}"#, &header, SECRET, TOLERANCE, NOW).is_err());
        assert!(verify_signature(body, &header, "whsec_other", TOLERANCE, NOW).is_err());
        assert!(verify_signature(body, &header, SECRET, TOLERANCE, NOW + 301).is_err());
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["", "t=abc,v1=00", "v1=00", "t=1760000000"] {
            assert!(matches!(
                verify_signature(b"{}", header, SECRET, TOLERANCE, NOW),
                Err(BillingError::InvalidSignature(_))
            ));
        }
    }
}
