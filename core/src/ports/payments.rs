//! Payment processor port.
//!
//! The platform charges the customer on its own account, transfers the
//! provider's share to the provider's connected account once the work is
//! confirmed, and refunds against the original charge. Every call carries an
//! idempotency key so retries never double-charge or double-pay.

use super::PortFuture;
use crate::earnings::Subject;
use crate::ids::{EarningsId, UserId};
use crate::money::{Currency, Money};
use crate::split::PaymentPhase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processor failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Card declined or payment method rejected
    #[error("payment declined: {0}")]
    Declined(String),

    /// Platform balance too low to transfer
    #[error("insufficient platform balance")]
    InsufficientBalance,

    /// Provider has no payout account
    #[error("payouts not configured: {0}")]
    NotConfigured(String),

    /// Processor unavailable or returned a server error
    #[error("processor error{}: {message}", .status.map_or_else(String::new, |s| format!(" ({s})")))]
    Upstream {
        /// HTTP status, if one was received
        status: Option<u16>,
        /// Processor message
        message: String,
    },

    /// Processor response could not be understood
    #[error("invalid processor response: {0}")]
    InvalidResponse(String),
}

impl PaymentError {
    /// Whether retrying later may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientBalance | Self::Upstream { .. } | Self::NotConfigured(_))
    }

    /// Whether the processor refused the request outright
    ///
    /// Repeating a refused request under the same idempotency key replays
    /// the refusal, so the next attempt needs a new key. Server errors and
    /// unreadable responses are not refusals: the request may have been
    /// applied, and a retry must reuse the key.
    #[must_use]
    pub const fn is_refusal(&self) -> bool {
        match self {
            Self::Declined(_) => true,
            Self::Upstream {
                status: Some(status), ..
            } => *status >= 400 && *status < 500,
            _ => false,
        }
    }
}

/// Charge the customer for one payment phase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Booking or job
    pub subject: Subject,
    /// Phase
    pub phase: PaymentPhase,
    /// Paying customer
    pub customer_id: UserId,
    /// Amount to charge
    pub amount: Money,
    /// Platform fee within `amount`
    pub platform_fee: Money,
    /// Currency
    pub currency: Currency,
    /// Saved payment method to confirm with, if any
    pub payment_method: Option<String>,
    /// Processor idempotency key
    pub idempotency_key: String,
}

/// State of a created charge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Captured now
    Succeeded,
    /// Awaiting customer action; capture arrives by webhook
    Pending,
}

/// Result of a charge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeOutcome {
    /// Processor charge / payment intent reference
    pub charge_ref: String,
    /// Captured or pending
    pub status: ChargeStatus,
    /// Secret the client uses to finish a pending charge
    pub client_secret: Option<String>,
}

/// Cancel a charge that has not been captured
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidRequest {
    /// Processor reference of the pending charge
    pub charge_ref: String,
    /// Processor idempotency key
    pub idempotency_key: String,
}

/// Pay a provider from the platform balance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Earnings row being paid
    pub earnings_id: EarningsId,
    /// Booking or job, used as the transfer group
    pub subject: Subject,
    /// Provider's connected account
    pub destination_account: String,
    /// Amount
    pub amount: Money,
    /// Currency
    pub currency: Currency,
    /// Processor idempotency key
    pub idempotency_key: String,
}

/// Result of a transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Processor transfer reference
    pub transfer_ref: String,
}

/// Refund part of a charge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Original charge reference
    pub charge_ref: String,
    /// Amount to refund
    pub amount: Money,
    /// Reason recorded with the processor
    pub reason: String,
    /// Processor idempotency key
    pub idempotency_key: String,
}

/// Result of a refund
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundOutcome {
    /// Processor refund reference
    pub refund_ref: String,
}

/// Hosted payment processor
pub trait PaymentProcessor: Send + Sync {
    /// Charge a customer
    fn charge(&self, request: ChargeRequest) -> PortFuture<'_, ChargeOutcome, PaymentError>;

    /// Cancel a charge that is still awaiting customer action
    fn void_charge(&self, request: VoidRequest) -> PortFuture<'_, (), PaymentError>;

    /// Transfer to a provider
    fn transfer(&self, request: TransferRequest) -> PortFuture<'_, TransferOutcome, PaymentError>;

    /// Refund a charge
    fn refund(&self, request: RefundRequest) -> PortFuture<'_, RefundOutcome, PaymentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_client_errors_and_declines_are_refusals() {
        assert!(PaymentError::Declined("card_declined".into()).is_refusal());
        assert!(PaymentError::Upstream {
            status: Some(400),
            message: "idempotency_error".into()
        }
        .is_refusal());
        assert!(!PaymentError::Upstream {
            status: Some(503),
            message: "unavailable".into()
        }
        .is_refusal());
        assert!(!PaymentError::Upstream {
            status: None,
            message: "timeout".into()
        }
        .is_refusal());
        assert!(!PaymentError::InvalidResponse("truncated".into()).is_refusal());
    }
}
