//! Effect descriptions returned by the booking and job reducers.
//!
//! Reducers never call the processor or the store. They describe what must
//! happen and the service layer executes it: processor effects first (with
//! the idempotency key carried here), then one store commit, then
//! notifications.

use crate::earnings::{EarningsDraft, Subject};
use crate::ids::{PaymentId, UserId};
use crate::money::Money;
use crate::split::{PaymentPhase, PaymentSplit, RefundSplit};
use serde::{Deserialize, Serialize};

/// Side effect requested by a reducer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketEffect {
    /// Charge the customer
    Charge {
        /// Booking or job being paid
        subject: Subject,
        /// Phase being paid
        phase: PaymentPhase,
        /// Amounts to charge and route
        split: PaymentSplit,
        /// Saved payment method to confirm with, if any
        payment_method: Option<String>,
        /// Processor idempotency key
        idempotency_key: String,
    },

    /// Cancel a charge that has not been captured
    VoidCharge {
        /// Booking or job the charge was for
        subject: Subject,
        /// Processor reference of the pending charge
        charge_ref: String,
        /// Processor idempotency key
        idempotency_key: String,
    },

    /// Refund part of a captured charge
    Refund {
        /// Payment being refunded
        payment_id: PaymentId,
        /// Processor reference of the original charge
        charge_ref: String,
        /// Refund amount with fee/provider shares
        split: RefundSplit,
        /// Reason recorded with the refund
        reason: String,
        /// Processor idempotency key
        idempotency_key: String,
    },

    /// Create a `held` earnings row
    CreateEarnings(EarningsDraft),

    /// Reduce the earnings of a payment by a refund's provider share
    ReduceEarnings {
        /// Payment whose earnings shrink
        payment_id: PaymentId,
        /// Provider share of the refund
        provider_share: Money,
    },

    /// Transfer every transferable earnings row of the subject
    TransferEarnings {
        /// Booking or job
        subject: Subject,
    },

    /// Publish a realtime notification
    Notify(Notification),
}

impl MarketEffect {
    /// Whether executing this effect calls the payment processor
    #[must_use]
    pub const fn is_processor_call(&self) -> bool {
        matches!(
            self,
            Self::Charge { .. } | Self::VoidCharge { .. } | Self::Refund { .. } | Self::TransferEarnings { .. }
        )
    }
}

/// What happened, for realtime notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Provider accepted a booking
    BookingAccepted,
    /// Provider set a quoted price
    PriceQuoted,
    /// Payment captured
    PaymentReceived,
    /// Provider marked the work done
    WorkCompleted,
    /// Customer or system confirmed completion
    CompletionConfirmed,
    /// Booking or job canceled
    Canceled,
    /// Dispute opened
    DisputeOpened,
    /// Admin resolved a dispute
    DisputeResolved,
    /// Customer left a review
    ReviewPosted,
    /// Reschedule proposed
    RescheduleProposed,
    /// Reschedule approved
    RescheduleApproved,
    /// Reschedule declined
    RescheduleDeclined,
    /// Provider quoted on a job
    QuoteSubmitted,
    /// Customer accepted a quote
    QuoteAccepted,
    /// Quote rejected because another was accepted
    QuoteRejected,
    /// Earnings transferred
    PayoutSent,
}

/// A realtime notification for one user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Who to notify
    pub recipient: UserId,
    /// What happened
    pub kind: NotificationKind,
    /// Which booking or job
    pub subject: Subject,
}

impl Notification {
    /// Notification effect helper
    #[must_use]
    pub const fn effect(recipient: UserId, kind: NotificationKind, subject: Subject) -> MarketEffect {
        MarketEffect::Notify(Self {
            recipient,
            kind,
            subject,
        })
    }
}
