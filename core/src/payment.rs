//! Captured payments, refunds and audit entries.

use crate::actor::Actor;
use crate::earnings::Subject;
use crate::ids::{PaymentId, RefundId};
use crate::money::Money;
use crate::split::{PaymentPhase, PaymentSplit, RefundBasis, RefundSplit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One captured charge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment ID
    pub id: PaymentId,
    /// Booking or job this payment belongs to
    pub subject: Subject,
    /// Which phase the charge covers
    pub phase: PaymentPhase,
    /// Processor charge / payment intent reference
    pub charge_ref: String,
    /// Split at capture time
    pub split: PaymentSplit,
    /// Total refunded so far
    pub refunded: Money,
    /// Fee share refunded so far
    pub refunded_fee: Money,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Amount still refundable
    #[must_use]
    pub const fn refundable(&self) -> Money {
        self.split.total_charge.saturating_sub(self.refunded)
    }

    /// Refund basis reflecting prior refunds
    #[must_use]
    pub const fn refund_basis(&self) -> RefundBasis {
        RefundBasis {
            original_charge: self.split.total_charge,
            original_fee: Some(self.split.platform_fee),
            transfer_amount: Some(self.split.provider_amount),
            already_refunded: self.refunded,
            already_refunded_fee: self.refunded_fee,
        }
    }

    /// Record a refund against this payment
    pub fn apply_refund(&mut self, refund: &RefundSplit) {
        self.refunded = self.refunded.saturating_add(refund.refund_amount);
        self.refunded_fee = self.refunded_fee.saturating_add(refund.platform_fee);
    }

    /// Whether the full charge has been refunded
    #[must_use]
    pub fn is_fully_refunded(&self) -> bool {
        self.refunded >= self.split.total_charge
    }
}

/// A charge the processor created but has not captured yet
///
/// Held on the booking or job until the capture webhook arrives, the charge
/// is voided, or a new attempt supersedes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCharge {
    /// Processor charge / payment intent reference
    pub charge_ref: String,
    /// Phase being paid
    pub phase: PaymentPhase,
    /// Split the charge was created with
    pub split: PaymentSplit,
    /// Key the charge was created under
    pub idempotency_key: String,
    /// When the processor reported it pending
    pub created_at: DateTime<Utc>,
}

/// Processor idempotency key for one charge attempt
///
/// The key names the attempt, the amount and the payment method, so a retry
/// after a decline, a card change or a new quote reaches the processor as a
/// new request while a plain retry of the same request replays.
#[must_use]
pub fn charge_key(prefix: &str, attempt: u32, amount: Money, payment_method: Option<&str>) -> String {
    format!(
        "{prefix}-charge-{attempt}-{}-{}",
        amount.cents(),
        payment_method.unwrap_or("default")
    )
}

/// A processed refund
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    /// Refund ID
    pub id: RefundId,
    /// Payment refunded against
    pub payment_id: PaymentId,
    /// Processor refund reference
    pub refund_ref: String,
    /// Amount and its fee/provider shares
    pub split: RefundSplit,
    /// Free-text reason
    pub reason: String,
    /// When the refund was issued
    pub created_at: DateTime<Utc>,
}

/// Best-effort audit log entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Who did it
    pub actor: Actor,
    /// What it was done to
    pub subject: Subject,
    /// Short action name ("booking.cancel")
    pub action: String,
    /// Free-form detail
    pub detail: serde_json::Value,
    /// When
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_keys_change_with_attempt_amount_and_method() {
        let base = charge_key("booking-1", 0, Money::from_cents(10_000), Some("pm_visa"));
        assert_eq!(base, "booking-1-charge-0-10000-pm_visa");
        assert_ne!(base, charge_key("booking-1", 1, Money::from_cents(10_000), Some("pm_visa")));
        assert_ne!(base, charge_key("booking-1", 0, Money::from_cents(12_000), Some("pm_visa")));
        assert_ne!(base, charge_key("booking-1", 0, Money::from_cents(10_000), Some("pm_amex")));
        assert_eq!(
            charge_key("booking-1", 0, Money::from_cents(10_000), None),
            "booking-1-charge-0-10000-default"
        );
    }
}
