//! Provider earnings ledger rows.
//!
//! One row per settled payment event. Rows are created `held`, become
//! `awaiting_payout` when released (confirmation or a failed transfer) and
//! `paid_out` once a transfer reference is recorded. Refunds reduce the net
//! amount; a row reduced to zero is `reversed`.

use crate::ids::{BookingId, EarningsId, JobId, PaymentId, UserId};
use crate::money::Money;
use crate::split::{FeePolicy, PaymentSplit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum automatic transfer attempts before a row needs admin attention
pub const MAX_PAYOUT_ATTEMPTS: u32 = 5;

/// The booking or job a payment or earnings row belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Subject {
    /// A direct booking
    Booking(BookingId),
    /// An open-marketplace job
    Job(JobId),
}

impl Subject {
    /// Stable kind string used in storage
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Booking(_) => "booking",
            Self::Job(_) => "job",
        }
    }

    /// The underlying UUID
    #[must_use]
    pub const fn uuid(&self) -> &uuid::Uuid {
        match self {
            Self::Booking(id) => id.as_uuid(),
            Self::Job(id) => id.as_uuid(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind(), self.uuid())
    }
}

/// Payout state of an earnings row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Captured, not yet released to the provider
    Held,
    /// Released; transfer pending or being retried
    AwaitingPayout,
    /// Transferred to the provider
    PaidOut,
    /// Fully refunded before payout
    Reversed,
}

impl PayoutStatus {
    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::AwaitingPayout => "awaiting_payout",
            Self::PaidOut => "paid_out",
            Self::Reversed => "reversed",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "held" => Ok(Self::Held),
            "awaiting_payout" => Ok(Self::AwaitingPayout),
            "paid_out" => Ok(Self::PaidOut),
            "reversed" => Ok(Self::Reversed),
            other => Err(format!("unknown payout status: {other}")),
        }
    }
}

/// Earnings to create for a captured payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsDraft {
    /// Payment the earnings derive from
    pub payment_id: PaymentId,
    /// Provider to be paid
    pub provider_id: UserId,
    /// Booking or job
    pub subject: Subject,
    /// Captured amount
    pub gross: Money,
    /// Platform fee kept
    pub platform_fee: Money,
    /// GST contained in the fee
    pub gst: Money,
    /// Provider's share
    pub net: Money,
}

impl EarningsDraft {
    /// Derive a draft from a captured split
    #[must_use]
    pub fn from_split(
        payment_id: PaymentId,
        provider_id: UserId,
        subject: Subject,
        split: &PaymentSplit,
        policy: &FeePolicy,
    ) -> Self {
        Self {
            payment_id,
            provider_id,
            subject,
            gross: split.total_charge,
            platform_fee: split.platform_fee,
            gst: policy.gst_component(split.platform_fee),
            net: split.provider_amount,
        }
    }

    /// Materialise the draft as a `held` row
    #[must_use]
    pub fn into_earnings(self, now: DateTime<Utc>) -> ProviderEarnings {
        ProviderEarnings {
            id: EarningsId::new(),
            provider_id: self.provider_id,
            payment_id: self.payment_id,
            subject: self.subject,
            gross: self.gross,
            platform_fee: self.platform_fee,
            gst: self.gst,
            net: self.net,
            reversed_amount: Money::ZERO,
            status: PayoutStatus::Held,
            transfer_ref: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A provider earnings row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEarnings {
    /// Row ID
    pub id: EarningsId,
    /// Provider
    pub provider_id: UserId,
    /// Source payment
    pub payment_id: PaymentId,
    /// Booking or job
    pub subject: Subject,
    /// Captured amount
    pub gross: Money,
    /// Platform fee
    pub platform_fee: Money,
    /// GST within the fee
    pub gst: Money,
    /// Amount owed to the provider after refunds
    pub net: Money,
    /// Refunded after payout; recovered from the provider out of band
    pub reversed_amount: Money,
    /// Payout state
    pub status: PayoutStatus,
    /// Processor transfer reference once paid
    pub transfer_ref: Option<String>,
    /// Transfer attempts so far
    pub attempts: u32,
    /// Last transfer error
    pub last_error: Option<String>,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last modified
    pub updated_at: DateTime<Utc>,
}

impl ProviderEarnings {
    /// Idempotency key for this row's transfer, stable across retries
    #[must_use]
    pub fn transfer_idempotency_key(&self) -> String {
        format!("earnings-{}-transfer", self.id)
    }

    /// Whether a transfer should be issued for this row
    #[must_use]
    pub fn is_transferable(&self) -> bool {
        matches!(self.status, PayoutStatus::Held | PayoutStatus::AwaitingPayout)
            && self.transfer_ref.is_none()
            && !self.net.is_zero()
    }

    /// Whether the payout sweep should pick this row up
    #[must_use]
    pub fn is_due_for_retry(&self, max_attempts: u32) -> bool {
        self.status == PayoutStatus::AwaitingPayout
            && self.transfer_ref.is_none()
            && self.attempts < max_attempts
    }

    /// Release a held row for payout
    pub fn release(&mut self, now: DateTime<Utc>) {
        if self.status == PayoutStatus::Held {
            self.status = PayoutStatus::AwaitingPayout;
            self.updated_at = now;
        }
    }

    /// Record a successful transfer
    pub fn mark_paid_out(&mut self, transfer_ref: impl Into<String>, now: DateTime<Utc>) {
        self.status = PayoutStatus::PaidOut;
        self.transfer_ref = Some(transfer_ref.into());
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = None;
        self.updated_at = now;
    }

    /// Record a failed transfer; the row stays queued for the sweep
    pub fn mark_transfer_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = PayoutStatus::AwaitingPayout;
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    /// Reduce by the provider share of a refund
    ///
    /// Unpaid rows lose net and become `reversed` at zero. Paid-out rows
    /// keep their status and accumulate `reversed_amount`.
    pub fn reduce(&mut self, provider_share: Money, now: DateTime<Utc>) {
        if provider_share.is_zero() {
            return;
        }
        match self.status {
            PayoutStatus::PaidOut => {
                self.reversed_amount = self.reversed_amount.saturating_add(provider_share);
            }
            PayoutStatus::Reversed => return,
            PayoutStatus::Held | PayoutStatus::AwaitingPayout => {
                self.net = self.net.saturating_sub(provider_share);
                if self.net.is_zero() {
                    self.status = PayoutStatus::Reversed;
                }
            }
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    fn row() -> ProviderEarnings {
        let split = PaymentSplit {
            total_charge: Money::from_cents(10_000),
            platform_fee: Money::from_cents(1_000),
            provider_amount: Money::from_cents(9_000),
            currency: Currency::Nzd,
        };
        EarningsDraft::from_split(
            PaymentId::new(),
            UserId::new(),
            Subject::Booking(BookingId::new()),
            &split,
            &FeePolicy::default(),
        )
        .into_earnings(Utc::now())
    }

    #[test]
    fn draft_carries_split_and_gst() {
        let earnings = row();
        assert_eq!(earnings.net, Money::from_cents(9_000));
        assert_eq!(earnings.gst, Money::from_cents(131));
        assert_eq!(earnings.status, PayoutStatus::Held);
        assert!(earnings.is_transferable());
    }

    #[test]
    fn failed_transfer_queues_for_retry() {
        let mut earnings = row();
        earnings.mark_transfer_failed("insufficient balance", Utc::now());
        assert_eq!(earnings.status, PayoutStatus::AwaitingPayout);
        assert!(earnings.is_due_for_retry(MAX_PAYOUT_ATTEMPTS));

        earnings.mark_paid_out("tr_1", Utc::now());
        assert!(!earnings.is_transferable());
        assert!(!earnings.is_due_for_retry(MAX_PAYOUT_ATTEMPTS));
        assert_eq!(earnings.attempts, 2);
    }

    #[test]
    fn full_reduction_reverses_unpaid_row() {
        let mut earnings = row();
        earnings.reduce(Money::from_cents(4_500), Utc::now());
        assert_eq!(earnings.net, Money::from_cents(4_500));
        assert_eq!(earnings.status, PayoutStatus::Held);

        earnings.reduce(Money::from_cents(4_500), Utc::now());
        assert_eq!(earnings.status, PayoutStatus::Reversed);
        assert!(!earnings.is_transferable());
    }

    #[test]
    fn reduction_after_payout_is_tracked_separately() {
        let mut earnings = row();
        earnings.mark_paid_out("tr_1", Utc::now());
        earnings.reduce(Money::from_cents(1_000), Utc::now());
        assert_eq!(earnings.status, PayoutStatus::PaidOut);
        assert_eq!(earnings.net, Money::from_cents(9_000));
        assert_eq!(earnings.reversed_amount, Money::from_cents(1_000));
    }

    #[test]
    fn transfer_key_is_stable() {
        let earnings = row();
        assert_eq!(
            earnings.transfer_idempotency_key(),
            format!("earnings-{}-transfer", earnings.id)
        );
    }
}
