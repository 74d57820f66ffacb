//! Payment split calculator.
//!
//! Computes how a customer charge divides between the platform fee and the
//! provider payout, and how a refund divides the same way.
//!
//! # Rounding
//!
//! Every fee derivation rounds up to the next cent (forward fees, refund fee
//! shares, GST components). The provider side is always the remainder, so
//! the two parts sum exactly to the charge or refund.
//!
//! ```text
//! fee      = ceil(amount × bps / 10_000)
//! provider = amount − fee
//! ```

use crate::money::{Currency, Money};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Basis points in 100%
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Default starter-tier platform fee (10%)
pub const DEFAULT_STARTER_FEE_BPS: u32 = 1_000;

/// Default GST rate (15%)
pub const DEFAULT_GST_BPS: u32 = 1_500;

/// Default minimum chargeable amount (NZD 1.00)
pub const DEFAULT_MINIMUM_CHARGE_CENTS: u64 = 100;

/// Errors raised by the split calculator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitError {
    /// Amount was zero or negative
    #[error("amount must be positive, got {amount}")]
    NonPositiveAmount {
        /// The rejected amount in cents
        amount: i64,
    },

    /// Plan tier string not recognised
    #[error("unknown plan tier: {0}")]
    UnknownPlanTier(String),

    /// Remainder phase larger than the whole job
    #[error("remainder {remainder} exceeds job total {job_total}")]
    RemainderExceedsJobTotal {
        /// Remainder charge
        remainder: Money,
        /// Full job amount
        job_total: Money,
    },

    /// Refund larger than what was charged
    #[error("refund {refund} exceeds refundable amount {refundable}")]
    RefundExceedsCharge {
        /// Requested refund
        refund: Money,
        /// Amount still refundable
        refundable: Money,
    },

    /// Rate above 100%
    #[error("rate of {bps} basis points exceeds 100%")]
    InvalidRate {
        /// Offending rate
        bps: u32,
    },
}

/// Provider subscription plan
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Free plan, pays a per-transaction platform fee
    #[default]
    Starter,
    /// Paid plan, no per-transaction fee
    Pro,
    /// Paid plan, no per-transaction fee
    Elite,
}

impl PlanTier {
    /// Whether this tier pays the per-transaction platform fee
    #[must_use]
    pub const fn charges_platform_fee(self) -> bool {
        matches!(self, Self::Starter)
    }

    /// Stable string form used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Elite => "elite",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "elite" => Ok(Self::Elite),
            other => Err(SplitError::UnknownPlanTier(other.to_string())),
        }
    }
}

/// Which part of a job a payment covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPhase {
    /// The whole amount in one payment
    Full,
    /// Up-front deposit
    Deposit,
    /// Balance after a deposit
    Remainder,
}

impl PaymentPhase {
    /// Stable string form used in storage and idempotency keys
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Deposit => "deposit",
            Self::Remainder => "remainder",
        }
    }
}

impl fmt::Display for PaymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "deposit" => Ok(Self::Deposit),
            "remainder" => Ok(Self::Remainder),
            other => Err(format!("unknown payment phase: {other}")),
        }
    }
}

/// Payment type as seen by the calculator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentType {
    /// Single payment for the whole amount
    Full,
    /// Deposit phase; fee is computed on the deposit alone
    Deposit,
    /// Remainder phase; fee tops up to the full-job fee
    Remainder {
        /// Full job amount (deposit + remainder)
        job_total: Money,
    },
}

impl PaymentType {
    /// The phase this payment type records as
    #[must_use]
    pub const fn phase(self) -> PaymentPhase {
        match self {
            Self::Full => PaymentPhase::Full,
            Self::Deposit => PaymentPhase::Deposit,
            Self::Remainder { .. } => PaymentPhase::Remainder,
        }
    }
}

/// Platform fee policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Starter-tier fee in basis points
    pub starter_fee_bps: u32,
    /// GST rate in basis points (fees are GST-inclusive)
    pub gst_bps: u32,
    /// Smallest chargeable amount
    pub minimum_charge: Money,
    /// Settlement currency
    pub currency: Currency,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            starter_fee_bps: DEFAULT_STARTER_FEE_BPS,
            gst_bps: DEFAULT_GST_BPS,
            minimum_charge: Money::from_cents(DEFAULT_MINIMUM_CHARGE_CENTS),
            currency: Currency::Nzd,
        }
    }
}

impl FeePolicy {
    /// Check the rates are within 0..=100%
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::InvalidRate`] for a fee rate above 100%.
    pub const fn validate(&self) -> Result<(), SplitError> {
        if self.starter_fee_bps > BPS_DENOMINATOR {
            return Err(SplitError::InvalidRate {
                bps: self.starter_fee_bps,
            });
        }
        if self.gst_bps > BPS_DENOMINATOR {
            return Err(SplitError::InvalidRate { bps: self.gst_bps });
        }
        Ok(())
    }

    /// Fee rate for a plan tier
    #[must_use]
    pub const fn fee_bps(&self, tier: PlanTier) -> u32 {
        if tier.charges_platform_fee() {
            self.starter_fee_bps
        } else {
            0
        }
    }

    /// Platform fee on `amount` for `tier`, rounded up, never above `amount`
    #[must_use]
    pub fn fee_for(&self, amount: Money, tier: PlanTier) -> Money {
        let bps = self.fee_bps(tier).min(BPS_DENOMINATOR);
        Money::from_cents(mul_div_ceil(
            amount.cents(),
            u64::from(bps),
            u64::from(BPS_DENOMINATOR),
        ))
        .min(amount)
    }

    /// GST component contained in a GST-inclusive fee
    #[must_use]
    pub fn gst_component(&self, fee: Money) -> Money {
        let gst = u64::from(self.gst_bps);
        Money::from_cents(mul_div_ceil(
            fee.cents(),
            gst,
            u64::from(BPS_DENOMINATOR) + gst,
        ))
        .min(fee)
    }
}

/// Result of the split calculation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSplit {
    /// What the customer is charged
    pub total_charge: Money,
    /// What the platform keeps
    pub platform_fee: Money,
    /// What the provider receives
    pub provider_amount: Money,
    /// Settlement currency
    pub currency: Currency,
}

impl PaymentSplit {
    /// Fee and provider amount sum exactly to the charge
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.platform_fee.checked_add(self.provider_amount) == Some(self.total_charge)
    }
}

/// Compute the split for one payment.
///
/// `prior_platform_fee_collected` only matters for the remainder phase: the
/// remainder fee is `max(fee(job_total) − prior, 0)`, capped at the
/// remainder charge, so a deposit plus remainder never collects more fee than
/// one payment of the whole job would.
///
/// # Errors
///
/// - [`SplitError::NonPositiveAmount`] if `base_amount_cents <= 0`
/// - [`SplitError::RemainderExceedsJobTotal`] if a remainder is larger than its job
/// - [`SplitError::InvalidRate`] if the policy rate is above 100%
pub fn compute_split(
    policy: &FeePolicy,
    base_amount_cents: i64,
    tier: PlanTier,
    payment_type: PaymentType,
    prior_platform_fee_collected: Option<Money>,
) -> Result<PaymentSplit, SplitError> {
    policy.validate()?;
    let total = positive_amount(base_amount_cents)?;

    let fee = match payment_type {
        PaymentType::Full | PaymentType::Deposit => policy.fee_for(total, tier),
        PaymentType::Remainder { job_total } => {
            if total > job_total {
                return Err(SplitError::RemainderExceedsJobTotal {
                    remainder: total,
                    job_total,
                });
            }
            policy
                .fee_for(job_total, tier)
                .saturating_sub(prior_platform_fee_collected.unwrap_or(Money::ZERO))
        }
    }
    .min(total);

    Ok(PaymentSplit {
        total_charge: total,
        platform_fee: fee,
        provider_amount: total.saturating_sub(fee),
        currency: policy.currency,
    })
}

/// What is known about the original charge when refunding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefundBasis {
    /// Amount originally charged
    pub original_charge: Money,
    /// Platform fee on the original charge, if recorded
    pub original_fee: Option<Money>,
    /// Amount transferred to the provider's connected account, if recorded
    pub transfer_amount: Option<Money>,
    /// Total already refunded against this charge
    pub already_refunded: Money,
    /// Fee share already refunded against this charge
    pub already_refunded_fee: Money,
}

impl RefundBasis {
    /// Basis for a charge with a known split and no prior refunds
    #[must_use]
    pub const fn from_split(split: &PaymentSplit) -> Self {
        Self {
            original_charge: split.total_charge,
            original_fee: Some(split.platform_fee),
            transfer_amount: Some(split.provider_amount),
            already_refunded: Money::ZERO,
            already_refunded_fee: Money::ZERO,
        }
    }

    /// Amount still refundable
    #[must_use]
    pub const fn refundable(&self) -> Money {
        self.original_charge.saturating_sub(self.already_refunded)
    }

    fn effective_fee(&self) -> Money {
        self.original_fee
            .or_else(|| {
                self.transfer_amount
                    .map(|transfer| self.original_charge.saturating_sub(transfer))
            })
            .unwrap_or(Money::ZERO)
            .min(self.original_charge)
    }
}

/// How a refund divides between platform and provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundSplit {
    /// Amount returned to the customer
    pub refund_amount: Money,
    /// Portion of the refund taken back from the platform fee
    pub platform_fee: Money,
    /// Portion of the refund taken back from the provider
    pub provider_amount: Money,
}

impl RefundSplit {
    /// Fee and provider shares sum exactly to the refund
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.platform_fee.checked_add(self.provider_amount) == Some(self.refund_amount)
    }
}

/// Prorate a refund across platform fee and provider amount.
///
/// The refunded fee is `ceil(fee × refund / charge)`, capped so cumulative
/// fee refunds never exceed the original fee. Without recorded fee data the
/// fee is derived from the transfer amount; with neither, the whole refund is
/// the provider's share.
///
/// # Errors
///
/// - [`SplitError::NonPositiveAmount`] for a zero refund
/// - [`SplitError::RefundExceedsCharge`] when the refund is above what is still refundable
pub fn prorate_refund(refund: Money, basis: &RefundBasis) -> Result<RefundSplit, SplitError> {
    if refund.is_zero() {
        return Err(SplitError::NonPositiveAmount { amount: 0 });
    }
    let refundable = basis.refundable();
    if refund > refundable {
        return Err(SplitError::RefundExceedsCharge { refund, refundable });
    }

    let fee = basis.effective_fee();
    let fee_left = fee.saturating_sub(basis.already_refunded_fee);
    let prorated = Money::from_cents(mul_div_ceil(
        fee.cents(),
        refund.cents(),
        basis.original_charge.cents().max(1),
    ));
    let platform_fee = prorated.min(fee_left).min(refund);

    Ok(RefundSplit {
        refund_amount: refund,
        platform_fee,
        provider_amount: refund.saturating_sub(platform_fee),
    })
}

fn positive_amount(cents: i64) -> Result<Money, SplitError> {
    if cents <= 0 {
        return Err(SplitError::NonPositiveAmount { amount: cents });
    }
    Money::from_i64(cents).ok_or(SplitError::NonPositiveAmount { amount: cents })
}

/// `ceil(value × numer / denom)` in 128-bit arithmetic, saturating at `u64::MAX`
fn mul_div_ceil(value: u64, numer: u64, denom: u64) -> u64 {
    if denom == 0 {
        return 0;
    }
    let product = u128::from(value) * u128::from(numer);
    u64::try_from(product.div_ceil(u128::from(denom))).unwrap_or(u64::MAX)
}
