//! Processor webhook verification and decoding.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex>[,v1=<hex>…]`
//! where each `v1` is `HMAC-SHA256(secret, "{t}.{raw body}")`. Events whose
//! timestamp is further than the tolerance from now are rejected so a
//! captured delivery cannot be replayed later.

use hmac::{Hmac, Mac};
use marketplace_core::earnings::Subject;
use marketplace_core::ids::{BookingId, JobId};
use marketplace_core::money::{Currency, Money};
use marketplace_core::split::{PaymentPhase, PaymentSplit};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Default accepted clock skew
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Webhook rejections
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// No signature header
    #[error("missing signature header")]
    MissingSignature,

    /// Header present but not `t=…,v1=…`
    #[error("malformed signature header")]
    MalformedSignature,

    /// Timestamp outside the tolerance window
    #[error("signature timestamp outside tolerance")]
    Expired,

    /// No `v1` signature matched
    #[error("signature mismatch")]
    BadSignature,

    /// Body is not a webhook event
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

/// Verifies signed webhook deliveries
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Create a verifier for a signing secret
    #[must_use]
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    /// Check a delivery's signature against `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// Returns a [`WebhookError`] describing why the delivery is rejected.
    pub fn verify(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<(), WebhookError> {
        let header = header.ok_or(WebhookError::MissingSignature)?;
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| WebhookError::MalformedSignature)?);
                }
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MalformedSignature)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedSignature);
        }
        let skew = now.abs_diff(timestamp);
        if skew > self.tolerance.as_secs() {
            return Err(WebhookError::Expired);
        }

        for signature in signatures {
            let Ok(expected) = hex::decode(signature) else {
                continue;
            };
            let mut mac = self.mac(timestamp)?;
            mac.update(payload);
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(WebhookError::BadSignature)
    }

    /// Produce a header for a payload, as the processor would.
    ///
    /// # Errors
    ///
    /// Fails only if the secret cannot key the MAC.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let mut mac = self.mac(timestamp)?;
        mac.update(payload);
        Ok(format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self, timestamp: i64) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::BadSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        Ok(mac)
    }
}

/// Envelope of a processor event
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Unique event ID, used for deduplication
    pub id: String,
    /// Event type, e.g. `payment_intent.succeeded`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload
    pub data: WebhookData,
}

/// `data` member of an event
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    /// The object the event is about
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Decode an event body.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::InvalidPayload`] for malformed JSON.
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }

    /// Interpret the event
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::InvalidPayload`] when a known event type has
    /// an object missing required fields.
    pub fn kind(&self) -> Result<EventKind, WebhookError> {
        match self.event_type.as_str() {
            "payment_intent.succeeded" => self.captured().map(EventKind::PaymentCaptured),
            "transfer.paid" => Ok(EventKind::TransferPaid {
                transfer_ref: self.object_id()?,
            }),
            "charge.refunded" => Ok(EventKind::ChargeRefunded {
                charge_ref: self
                    .data
                    .object
                    .get("payment_intent")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| self.object_id(), |s| Ok(s.to_string()))?,
            }),
            _ => Ok(EventKind::Ignored),
        }
    }

    fn object_id(&self) -> Result<String, WebhookError> {
        self.data
            .object
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WebhookError::InvalidPayload("object has no id".to_string()))
    }

    fn captured(&self) -> Result<CapturedCharge, WebhookError> {
        #[derive(Deserialize)]
        struct Intent {
            id: String,
            amount: u64,
            currency: String,
            application_fee_amount: Option<u64>,
            #[serde(default)]
            metadata: Metadata,
        }

        #[derive(Default, Deserialize)]
        struct Metadata {
            subject_kind: Option<String>,
            subject_id: Option<String>,
            phase: Option<String>,
            platform_fee: Option<String>,
        }

        let invalid = |msg: &str| WebhookError::InvalidPayload(msg.to_string());
        let intent: Intent = serde_json::from_value(self.data.object.clone())
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let id = intent
            .metadata
            .subject_id
            .as_deref()
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
            .ok_or_else(|| invalid("metadata.subject_id missing or invalid"))?;
        let subject = match intent.metadata.subject_kind.as_deref() {
            Some("booking") => Subject::Booking(BookingId::from_uuid(id)),
            Some("job") => Subject::Job(JobId::from_uuid(id)),
            _ => return Err(invalid("metadata.subject_kind missing or invalid")),
        };
        let phase = match intent.metadata.phase.as_deref() {
            Some(phase) => phase.parse::<PaymentPhase>().map_err(|e| invalid(&e))?,
            None => PaymentPhase::Full,
        };
        let fee = match intent.metadata.platform_fee.as_deref() {
            Some(fee) => fee.parse::<u64>().map_err(|_| invalid("metadata.platform_fee is not an integer"))?,
            None => intent.application_fee_amount.unwrap_or(0),
        };
        let currency: Currency = intent.currency.parse().map_err(|e: String| invalid(&e))?;
        let total = Money::from_cents(intent.amount);
        let platform_fee = Money::from_cents(fee);
        let provider_amount = total
            .checked_sub(platform_fee)
            .ok_or_else(|| invalid("platform fee exceeds the charge"))?;

        Ok(CapturedCharge {
            charge_ref: intent.id,
            subject,
            phase,
            split: PaymentSplit {
                total_charge: total,
                platform_fee,
                provider_amount,
                currency,
            },
        })
    }
}

/// A capture reported by the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCharge {
    /// Payment intent reference
    pub charge_ref: String,
    /// Booking or job paid
    pub subject: Subject,
    /// Phase paid
    pub phase: PaymentPhase,
    /// Split rebuilt from the intent
    pub split: PaymentSplit,
}

/// Events the marketplace acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `payment_intent.succeeded`
    PaymentCaptured(CapturedCharge),
    /// `transfer.paid`
    TransferPaid {
        /// Transfer reference
        transfer_ref: String,
    },
    /// `charge.refunded`
    ChargeRefunded {
        /// Payment intent reference
        charge_ref: String,
    },
    /// Anything else
    Ignored,
}
