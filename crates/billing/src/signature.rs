//! Webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`.
//! The signed message is `"{t}.{raw body}"`, HMAC-SHA256 keyed with the
//! endpoint secret. Any matching `v1` entry accepts the payload (the sender
//! lists several during secret rotation).

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Name of the HTTP header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("timestamp outside tolerance")]
    StaleTimestamp,
    #[error("no signature matches the payload")]
    Mismatch,
}

/// Verifies signed webhook payloads.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl core::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            tolerance: Duration::seconds(DEFAULT_TOLERANCE_SECS),
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Verify `payload` against the header value at time `now`.
    pub fn verify(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::MissingHeader)?;
        let (timestamp, signatures) = parse_header(header)?;

        // `t=` is sender-controlled; an age that does not fit in i64 is stale.
        let tolerance = u64::try_from(self.tolerance.num_seconds()).unwrap_or(0);
        let fresh = now
            .timestamp()
            .checked_sub(timestamp)
            .is_some_and(|age| age.unsigned_abs() <= tolerance);
        if !fresh {
            return Err(SignatureError::StaleTimestamp);
        }

        let mac = self.mac(timestamp, payload);
        let matched = signatures.iter().any(|sig| match hex::decode(sig) {
            Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
            Err(_) => false,
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Produce a header value for `payload` (used by tests and local tooling).
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let digest = self.mac(timestamp, payload).finalize().into_bytes();
        format!("t={},v1={}", timestamp, hex::encode(digest))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac key of any length is valid"));
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac
    }
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SignatureError::MalformedHeader)?;
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::MalformedHeader)?,
                )
            }
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(t), false) => Ok((t, signatures)),
        _ => Err(SignatureError::MalformedHeader),
    }
}
