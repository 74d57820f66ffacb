//! Booking lifecycle state machine.
//!
//! ```text
//! requested ─▶ accepted ─▶ paid ─▶ completed_by_provider ─▶ completed ─▶ reviewed
//!     │            │         │  ╲            │                  │
//!     ▼            ▼         ▼   ╲           ▼                  ▼
//!  canceled_customer / canceled_provider    disputed ◀──────────┘
//!                                              │
//!                         completed ◀──────────┼──────▶ refunded
//!                                              ▼           ▲
//!                                     partially_refunded ──┘
//! ```
//!
//! Reschedules are a sub-flow (`pending → approved | declined`) that never
//! changes the primary status.

use crate::actor::{Actor, Party};
use crate::availability::{horizon, slot_end, ProviderAvailability, MAX_DURATION_MINUTES};
use crate::earnings::{EarningsDraft, Subject};
use crate::effect::{MarketEffect, Notification, NotificationKind};
use crate::environment::MarketEnvironment;
use crate::error::DomainError;
use crate::ids::{BookingId, PaymentId, ServiceId, UserId};
use crate::money::Money;
use crate::payment::{charge_key, PaymentRecord, PendingCharge};
use crate::reducer::Reducer;
use crate::split::{compute_split, prorate_refund, FeePolicy, PaymentPhase, PaymentSplit, PaymentType, PlanTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::str::FromStr;

const ENTITY: &str = "booking";

/// Booking status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Customer requested, provider has not answered
    Requested,
    /// Provider accepted
    Accepted,
    /// Payment captured
    Paid,
    /// Provider says the work is done
    CompletedByProvider,
    /// Customer (or system) confirmed
    Completed,
    /// Customer reviewed
    Reviewed,
    /// Canceled by the customer side
    CanceledCustomer,
    /// Canceled by the provider side
    CanceledProvider,
    /// Under dispute
    Disputed,
    /// Fully refunded after dispute
    Refunded,
    /// Partially refunded after dispute
    PartiallyRefunded,
}

impl BookingStatus {
    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::Paid => "paid",
            Self::CompletedByProvider => "completed_by_provider",
            Self::Completed => "completed",
            Self::Reviewed => "reviewed",
            Self::CanceledCustomer => "canceled_customer",
            Self::CanceledProvider => "canceled_provider",
            Self::Disputed => "disputed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    /// The allowed transition graph
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use BookingStatus::{
            Accepted, CanceledCustomer, CanceledProvider, Completed, CompletedByProvider, Disputed,
            PartiallyRefunded, Paid, Refunded, Requested, Reviewed,
        };
        matches!(
            (self, next),
            (Requested, Accepted | CanceledCustomer | CanceledProvider)
                | (Accepted, Paid | CanceledCustomer | CanceledProvider)
                | (Paid, CompletedByProvider | CanceledCustomer | CanceledProvider | Disputed)
                | (CompletedByProvider, Completed | Disputed)
                | (Completed, Reviewed | Disputed)
                | (Disputed, Completed | Refunded | PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    /// No outgoing transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Reviewed | Self::CanceledCustomer | Self::CanceledProvider | Self::Refunded
        )
    }

    /// Canceled by either side
    #[must_use]
    pub const fn is_canceled(self) -> bool {
        matches!(self, Self::CanceledCustomer | Self::CanceledProvider)
    }

    /// States in which the provider's time slot is occupied
    #[must_use]
    pub const fn occupies_slot(self) -> bool {
        matches!(self, Self::Accepted | Self::Paid)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "requested" => Self::Requested,
            "accepted" => Self::Accepted,
            "paid" => Self::Paid,
            "completed_by_provider" => Self::CompletedByProvider,
            "completed" => Self::Completed,
            "reviewed" => Self::Reviewed,
            "canceled_customer" => Self::CanceledCustomer,
            "canceled_provider" => Self::CanceledProvider,
            "disputed" => Self::Disputed,
            "refunded" => Self::Refunded,
            "partially_refunded" => Self::PartiallyRefunded,
            other => return Err(format!("unknown booking status: {other}")),
        })
    }
}

/// Reschedule proposal state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleStatus {
    /// Awaiting the counterpart
    Pending,
    /// Counterpart approved; the booking moved
    Approved,
    /// Counterpart declined
    Declined,
}

/// A proposal to move the booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleProposal {
    /// Side that proposed
    pub proposed_by: Party,
    /// New start time
    pub proposed_start: DateTime<Utc>,
    /// Proposal state
    pub status: RescheduleStatus,
    /// When proposed
    pub proposed_at: DateTime<Utc>,
}

/// Customer review
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// 1 to 5
    pub rating: u8,
    /// Optional text
    pub comment: Option<String>,
    /// When posted
    pub created_at: DateTime<Utc>,
}

/// Open dispute details
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Side that opened it
    pub opened_by: Party,
    /// Reason given
    pub reason: String,
    /// Status the booking was in when disputed
    pub disputed_from: BookingStatus,
    /// Admin resolution note, once resolved
    pub resolution: Option<String>,
}

/// A booking of a provider's service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// Customer
    pub customer_id: UserId,
    /// Provider
    pub provider_id: UserId,
    /// Service booked
    pub service_id: ServiceId,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Scheduled start
    pub scheduled_start: DateTime<Utc>,
    /// Length of the appointment
    pub duration_minutes: u32,
    /// Listed price when booked
    pub price_at_booking: Money,
    /// Provider override of the price
    pub provider_quoted_price: Option<Money>,
    /// Captured payment, once paid
    pub payment: Option<PaymentRecord>,
    /// Charge awaiting customer action
    #[serde(default)]
    pub pending_charge: Option<PendingCharge>,
    /// Charge attempts refused or superseded so far
    #[serde(default)]
    pub charge_attempts: u32,
    /// Whether the earnings row has been created
    pub earnings_recorded: bool,
    /// Latest reschedule proposal
    pub reschedule: Option<RescheduleProposal>,
    /// Review, once posted
    pub review: Option<Review>,
    /// Dispute, once opened
    pub dispute: Option<Dispute>,
    /// Cancellation reason
    pub cancellation_reason: Option<String>,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last modified
    pub updated_at: DateTime<Utc>,
    /// Bumped on every commit
    #[serde(default)]
    pub version: u64,
}

/// Input for a new booking request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Requesting customer
    pub customer_id: UserId,
    /// Provider being booked
    pub provider_id: UserId,
    /// Service being booked
    pub service_id: ServiceId,
    /// Desired start
    pub scheduled_start: DateTime<Utc>,
    /// Desired length
    pub duration_minutes: u32,
    /// Listed price
    pub price: Money,
}

impl Booking {
    /// Create a booking in `requested`
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] for self-bookings, zero prices,
    /// invalid durations, a start in the past or beyond the booking horizon.
    pub fn request(request: BookingRequest, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if request.customer_id == request.provider_id {
            return Err(DomainError::validation("self_booking", "cannot book your own service"));
        }
        if request.price.is_zero() {
            return Err(DomainError::validation("non_positive_amount", "price must be positive"));
        }
        if request.duration_minutes == 0 || request.duration_minutes > MAX_DURATION_MINUTES {
            return Err(DomainError::validation("invalid_duration", "duration must be between 1 minute and 24 hours"));
        }
        if request.scheduled_start < now {
            return Err(DomainError::validation("slot_in_past", "scheduled start is in the past"));
        }
        if request.scheduled_start > horizon(now)
            || slot_end(request.scheduled_start, request.duration_minutes).is_none()
        {
            return Err(DomainError::validation(
                "slot_out_of_range",
                "scheduled start is too far in the future",
            ));
        }
        Ok(Self {
            id: BookingId::new(),
            customer_id: request.customer_id,
            provider_id: request.provider_id,
            service_id: request.service_id,
            status: BookingStatus::Requested,
            scheduled_start: request.scheduled_start,
            duration_minutes: request.duration_minutes,
            price_at_booking: request.price,
            provider_quoted_price: None,
            payment: None,
            pending_charge: None,
            charge_attempts: 0,
            earnings_recorded: false,
            reschedule: None,
            review: None,
            dispute: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Amount the customer pays: the quoted price if set and positive
    #[must_use]
    pub fn final_amount(&self) -> Money {
        self.provider_quoted_price
            .filter(|price| !price.is_zero())
            .unwrap_or(self.price_at_booking)
    }

    /// Subject for payments and earnings
    #[must_use]
    pub const fn subject(&self) -> Subject {
        Subject::Booking(self.id)
    }

    /// Processor idempotency key for the current charge attempt
    #[must_use]
    pub fn charge_idempotency_key(&self, payment_method: Option<&str>) -> String {
        charge_key(
            &format!("booking-{}", self.id),
            self.charge_attempts,
            self.final_amount(),
            payment_method,
        )
    }

    /// Processor idempotency key for the next refund
    ///
    /// Keyed on the amount refunded so far so a retried refund reuses the
    /// key and a later partial refund gets a new one.
    #[must_use]
    pub fn refund_idempotency_key(&self) -> String {
        let refunded = self.payment.as_ref().map_or(0, |p| p.refunded.cents());
        format!("booking-{}-refund-{refunded}", self.id)
    }

    /// End of the scheduled slot
    #[must_use]
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        slot_end(self.scheduled_start, self.duration_minutes).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether a reschedule proposal awaits an answer
    #[must_use]
    pub fn has_pending_reschedule(&self) -> bool {
        self.reschedule
            .is_some_and(|proposal| proposal.status == RescheduleStatus::Pending)
    }

    fn party(&self, actor: &Actor) -> Option<Party> {
        actor.party_in(self.customer_id, self.provider_id)
    }

    fn user_for(&self, party: Party) -> UserId {
        match party {
            Party::Customer => self.customer_id,
            Party::Provider => self.provider_id,
        }
    }

    fn require_party(&self, actor: &Actor, party: Party, operation: &str) -> Result<(), DomainError> {
        if self.party(actor) == Some(party) {
            Ok(())
        } else {
            Err(DomainError::forbidden(format!(
                "only the booking's {} may {operation}",
                match party {
                    Party::Customer => "customer",
                    Party::Provider => "provider",
                }
            )))
        }
    }

    fn require_transition(&self, next: BookingStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::transition(ENTITY, self.status, next))
        }
    }

    fn notify(&self, party: Party, kind: NotificationKind) -> MarketEffect {
        Notification::effect(self.user_for(party), kind, self.subject())
    }

    fn void(&self, pending: &PendingCharge) -> MarketEffect {
        MarketEffect::VoidCharge {
            subject: self.subject(),
            charge_ref: pending.charge_ref.clone(),
            idempotency_key: format!("booking-{}-void-{}", self.id, pending.charge_ref),
        }
    }

    fn notify_both(&self, kind: NotificationKind) -> [MarketEffect; 2] {
        [self.notify(Party::Customer, kind), self.notify(Party::Provider, kind)]
    }
}

/// Actions on a booking
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingAction {
    /// Provider accepts the request
    Accept {
        /// Caller
        actor: Actor,
    },
    /// Provider overrides the price
    SetQuote {
        /// Caller
        actor: Actor,
        /// Quoted price
        price: Money,
    },
    /// Customer asks to pay
    RequestPayment {
        /// Caller
        actor: Actor,
        /// Provider's plan tier
        plan_tier: PlanTier,
        /// Saved payment method to charge, if any
        payment_method: Option<String>,
    },
    /// The processor created the charge but awaits customer action
    ChargePending {
        /// Charge to hold until capture
        pending: PendingCharge,
    },
    /// The processor refused the charge
    ChargeFailed,
    /// The processor reported a captured charge
    PaymentCaptured {
        /// New payment row ID
        payment_id: PaymentId,
        /// Processor charge reference
        charge_ref: String,
        /// Split charged
        split: PaymentSplit,
    },
    /// Provider marks the work done
    MarkCompleted {
        /// Caller
        actor: Actor,
    },
    /// Customer or system confirms completion
    ConfirmCompletion {
        /// Caller
        actor: Actor,
    },
    /// Cancel the booking
    Cancel {
        /// Caller
        actor: Actor,
        /// Side charged with the cancellation; required for admins
        side: Option<Party>,
        /// Free-text reason
        reason: String,
    },
    /// Customer or provider disputes
    OpenDispute {
        /// Caller
        actor: Actor,
        /// Reason
        reason: String,
    },
    /// Admin resolves a dispute with a refund (zero releases the payout)
    ResolveDispute {
        /// Caller
        actor: Actor,
        /// Amount to refund
        refund: Money,
        /// Resolution note
        note: String,
    },
    /// Customer reviews
    Review {
        /// Caller
        actor: Actor,
        /// 1 to 5
        rating: u8,
        /// Optional text
        comment: Option<String>,
    },
    /// Either party proposes a new start
    ProposeReschedule {
        /// Caller
        actor: Actor,
        /// Proposed start
        proposed_start: DateTime<Utc>,
        /// Provider availability at proposal time
        availability: ProviderAvailability,
    },
    /// Counterpart (or admin) answers the pending proposal
    RespondReschedule {
        /// Caller
        actor: Actor,
        /// Approve or decline
        approve: bool,
    },
}

impl BookingAction {
    /// Short operation name used in logs, metrics and audit entries
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::SetQuote { .. } => "set_quote",
            Self::RequestPayment { .. } => "request_payment",
            Self::ChargePending { .. } => "charge_pending",
            Self::ChargeFailed => "charge_failed",
            Self::PaymentCaptured { .. } => "payment_captured",
            Self::MarkCompleted { .. } => "mark_completed",
            Self::ConfirmCompletion { .. } => "confirm_completion",
            Self::Cancel { .. } => "cancel",
            Self::OpenDispute { .. } => "open_dispute",
            Self::ResolveDispute { .. } => "resolve_dispute",
            Self::Review { .. } => "review",
            Self::ProposeReschedule { .. } => "propose_reschedule",
            Self::RespondReschedule { .. } => "respond_reschedule",
        }
    }
}

/// The booking state machine
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingReducer;

type Effects = SmallVec<[MarketEffect; 4]>;

impl Reducer for BookingReducer {
    type State = Booking;
    type Action = BookingAction;
    type Environment = MarketEnvironment;
    type Effect = MarketEffect;
    type Error = DomainError;

    fn reduce(
        &self,
        booking: &mut Booking,
        action: BookingAction,
        env: &MarketEnvironment,
    ) -> Result<Effects, DomainError> {
        let now = env.clock.now();
        match action {
            BookingAction::Accept { actor } => {
                booking.require_party(&actor, Party::Provider, "accept")?;
                booking.require_transition(BookingStatus::Accepted)?;
                booking.status = BookingStatus::Accepted;
                booking.updated_at = now;
                Ok(smallvec![booking.notify(Party::Customer, NotificationKind::BookingAccepted)])
            }

            BookingAction::SetQuote { actor, price } => {
                booking.require_party(&actor, Party::Provider, "quote a price")?;
                if !matches!(booking.status, BookingStatus::Requested | BookingStatus::Accepted) {
                    return Err(DomainError::transition(ENTITY, booking.status, "quote"));
                }
                check_minimum(price, &env.policy)?;
                booking.provider_quoted_price = Some(price);
                booking.updated_at = now;
                Ok(smallvec![booking.notify(Party::Customer, NotificationKind::PriceQuoted)])
            }

            BookingAction::RequestPayment {
                actor,
                plan_tier,
                payment_method,
            } => {
                booking.require_party(&actor, Party::Customer, "pay")?;
                booking.require_transition(BookingStatus::Paid)?;
                let amount = booking.final_amount();
                check_minimum(amount, &env.policy)?;
                let cents = amount
                    .to_i64()
                    .ok_or_else(|| DomainError::validation("amount_too_large", "amount out of range"))?;
                let split = compute_split(&env.policy, cents, plan_tier, PaymentType::Full, None)?;

                let mut effects: Effects = SmallVec::new();
                let key = booking.charge_idempotency_key(payment_method.as_deref());
                if let Some(stale) = booking.pending_charge.take_if(|pending| pending.idempotency_key != key) {
                    effects.push(booking.void(&stale));
                    booking.charge_attempts = booking.charge_attempts.saturating_add(1);
                    booking.updated_at = now;
                }
                effects.push(MarketEffect::Charge {
                    subject: booking.subject(),
                    phase: PaymentPhase::Full,
                    split,
                    idempotency_key: booking.charge_idempotency_key(payment_method.as_deref()),
                    payment_method,
                });
                Ok(effects)
            }

            BookingAction::ChargePending { pending } => {
                let known = booking
                    .pending_charge
                    .as_ref()
                    .is_some_and(|held| held.charge_ref == pending.charge_ref);
                if known || booking.payment.is_some() {
                    return Ok(SmallVec::new());
                }
                booking.require_transition(BookingStatus::Paid)?;
                booking.pending_charge = Some(pending);
                booking.updated_at = now;
                Ok(SmallVec::new())
            }

            BookingAction::ChargeFailed => {
                booking.charge_attempts = booking.charge_attempts.saturating_add(1);
                booking.updated_at = now;
                Ok(SmallVec::new())
            }

            BookingAction::PaymentCaptured {
                payment_id,
                charge_ref,
                split,
            } => {
                if let Some(existing) = &booking.payment {
                    if existing.charge_ref == charge_ref {
                        return Ok(SmallVec::new());
                    }
                    return Err(DomainError::Conflict(format!(
                        "booking {} is already paid by charge {}",
                        booking.id, existing.charge_ref
                    )));
                }
                if !booking.status.is_canceled() {
                    booking.require_transition(BookingStatus::Paid)?;
                }
                if !split.is_balanced() {
                    return Err(DomainError::validation("unbalanced_split", "split does not sum to the charge"));
                }
                let mut payment = PaymentRecord {
                    id: payment_id,
                    subject: booking.subject(),
                    phase: PaymentPhase::Full,
                    charge_ref,
                    split,
                    refunded: Money::ZERO,
                    refunded_fee: Money::ZERO,
                    captured_at: now,
                };

                if booking.status.is_canceled() {
                    // Captured after the booking was canceled: keep the record
                    // and hand the money straight back.
                    let refund = prorate_refund(payment.refundable(), &payment.refund_basis())?;
                    payment.apply_refund(&refund);
                    let effect = MarketEffect::Refund {
                        payment_id,
                        charge_ref: payment.charge_ref.clone(),
                        split: refund,
                        reason: "booking canceled before the payment completed".to_string(),
                        idempotency_key: format!("booking-{}-late-capture-{}", booking.id, payment.charge_ref),
                    };
                    booking.payment = Some(payment);
                    booking.pending_charge = None;
                    booking.updated_at = now;
                    return Ok(smallvec![effect]);
                }

                booking.payment = Some(payment);
                booking.pending_charge = None;
                booking.status = BookingStatus::Paid;
                booking.updated_at = now;
                Ok(SmallVec::from_iter(booking.notify_both(NotificationKind::PaymentReceived)))
            }

            BookingAction::MarkCompleted { actor } => {
                booking.require_party(&actor, Party::Provider, "mark the work completed")?;
                booking.require_transition(BookingStatus::CompletedByProvider)?;
                let draft = earnings_draft(booking, &env.policy)?;
                booking.status = BookingStatus::CompletedByProvider;
                booking.updated_at = now;
                let mut effects: Effects = SmallVec::new();
                if let Some(draft) = draft {
                    booking.earnings_recorded = true;
                    effects.push(MarketEffect::CreateEarnings(draft));
                }
                effects.push(booking.notify(Party::Customer, NotificationKind::WorkCompleted));
                Ok(effects)
            }

            BookingAction::ConfirmCompletion { actor } => {
                if !actor.is_system() {
                    booking.require_party(&actor, Party::Customer, "confirm completion")?;
                }
                if matches!(booking.status, BookingStatus::Completed | BookingStatus::Reviewed) {
                    return Ok(SmallVec::new());
                }
                booking.require_transition(BookingStatus::Completed)?;
                booking.status = BookingStatus::Completed;
                booking.updated_at = now;
                Ok(smallvec![
                    MarketEffect::TransferEarnings {
                        subject: booking.subject()
                    },
                    booking.notify(Party::Provider, NotificationKind::CompletionConfirmed),
                ])
            }

            BookingAction::Cancel { actor, side, reason } => {
                let side = match (booking.party(&actor), actor.is_admin()) {
                    (Some(party), _) => party,
                    (None, true) => side.ok_or_else(|| {
                        DomainError::validation("cancel_side_required", "admin cancellations must name the canceling side")
                    })?,
                    (None, false) => {
                        return Err(DomainError::forbidden("only the booking's parties or an admin may cancel"));
                    }
                };
                let next = match side {
                    Party::Customer => BookingStatus::CanceledCustomer,
                    Party::Provider => BookingStatus::CanceledProvider,
                };
                booking.require_transition(next)?;

                let mut effects: Effects = SmallVec::new();
                refund_captured(booking, None, &reason, &mut effects)?;
                if let Some(pending) = booking.pending_charge.take() {
                    effects.push(booking.void(&pending));
                }
                booking.status = next;
                booking.cancellation_reason = Some(reason);
                booking.updated_at = now;
                effects.extend(booking.notify_both(NotificationKind::Canceled));
                Ok(effects)
            }

            BookingAction::OpenDispute { actor, reason } => {
                let party = booking
                    .party(&actor)
                    .ok_or_else(|| DomainError::forbidden("only the booking's parties may open a dispute"))?;
                if reason.trim().is_empty() {
                    return Err(DomainError::validation("reason_required", "a dispute needs a reason"));
                }
                booking.require_transition(BookingStatus::Disputed)?;
                booking.dispute = Some(Dispute {
                    opened_by: party,
                    reason,
                    disputed_from: booking.status,
                    resolution: None,
                });
                booking.status = BookingStatus::Disputed;
                booking.updated_at = now;
                Ok(smallvec![booking.notify(party.counterpart(), NotificationKind::DisputeOpened)])
            }

            BookingAction::ResolveDispute { actor, refund, note } => {
                if !actor.is_admin() {
                    return Err(DomainError::forbidden("only admins resolve disputes"));
                }
                resolve_dispute(booking, refund, note, &env.policy, now)
            }

            BookingAction::Review {
                actor,
                rating,
                comment,
            } => {
                booking.require_party(&actor, Party::Customer, "review")?;
                if !(1..=5).contains(&rating) {
                    return Err(DomainError::validation("invalid_rating", "rating must be between 1 and 5"));
                }
                booking.require_transition(BookingStatus::Reviewed)?;
                booking.review = Some(Review {
                    rating,
                    comment,
                    created_at: now,
                });
                booking.status = BookingStatus::Reviewed;
                booking.updated_at = now;
                Ok(smallvec![booking.notify(Party::Provider, NotificationKind::ReviewPosted)])
            }

            BookingAction::ProposeReschedule {
                actor,
                proposed_start,
                availability,
            } => {
                let party = booking
                    .party(&actor)
                    .ok_or_else(|| DomainError::forbidden("only the booking's parties may reschedule"))?;
                if !booking.status.occupies_slot() {
                    return Err(DomainError::transition(ENTITY, booking.status, "reschedule"));
                }
                if booking.has_pending_reschedule() {
                    return Err(DomainError::Conflict("a reschedule proposal is already pending".to_string()));
                }
                availability.check(proposed_start, booking.duration_minutes, Some(booking.id), now)?;
                booking.reschedule = Some(RescheduleProposal {
                    proposed_by: party,
                    proposed_start,
                    status: RescheduleStatus::Pending,
                    proposed_at: now,
                });
                booking.updated_at = now;
                Ok(smallvec![booking.notify(party.counterpart(), NotificationKind::RescheduleProposed)])
            }

            BookingAction::RespondReschedule { actor, approve } => {
                let proposal = booking
                    .reschedule
                    .filter(|proposal| proposal.status == RescheduleStatus::Pending)
                    .ok_or_else(|| DomainError::Conflict("no reschedule proposal is pending".to_string()))?;
                let answering = booking.party(&actor);
                if !actor.is_admin() && answering != Some(proposal.proposed_by.counterpart()) {
                    return Err(DomainError::forbidden("only the other party may answer a reschedule"));
                }
                if !booking.status.occupies_slot() {
                    return Err(DomainError::transition(ENTITY, booking.status, "reschedule"));
                }
                let (status, kind) = if approve {
                    booking.scheduled_start = proposal.proposed_start;
                    (RescheduleStatus::Approved, NotificationKind::RescheduleApproved)
                } else {
                    (RescheduleStatus::Declined, NotificationKind::RescheduleDeclined)
                };
                booking.reschedule = Some(RescheduleProposal { status, ..proposal });
                booking.updated_at = now;
                Ok(smallvec![booking.notify(proposal.proposed_by, kind)])
            }
        }
    }
}

fn check_minimum(amount: Money, policy: &FeePolicy) -> Result<(), DomainError> {
    if amount < policy.minimum_charge {
        return Err(DomainError::validation(
            "below_minimum_charge",
            format!("amount {amount} is below the minimum charge of {}", policy.minimum_charge),
        ));
    }
    Ok(())
}

fn earnings_draft(booking: &Booking, policy: &FeePolicy) -> Result<Option<EarningsDraft>, DomainError> {
    if booking.earnings_recorded {
        return Ok(None);
    }
    let payment = booking
        .payment
        .as_ref()
        .ok_or_else(|| DomainError::Conflict(format!("booking {} has no captured payment", booking.id)))?;
    Ok(Some(EarningsDraft::from_split(
        payment.id,
        booking.provider_id,
        booking.subject(),
        &payment.split,
        policy,
    )))
}

/// Refund `amount` (or everything still refundable) of the captured charge.
///
/// Pushes the refund and earnings-reduction effects and records the refund
/// on the payment. Returns whether the charge is now fully refunded.
fn refund_captured(
    booking: &mut Booking,
    amount: Option<Money>,
    reason: &str,
    effects: &mut Effects,
) -> Result<bool, DomainError> {
    let idempotency_key = booking.refund_idempotency_key();
    let earnings_recorded = booking.earnings_recorded;
    let Some(payment) = booking.payment.as_mut() else {
        return Ok(false);
    };
    let amount = amount.unwrap_or_else(|| payment.refundable());
    if amount.is_zero() {
        return Ok(payment.is_fully_refunded());
    }
    let split = prorate_refund(amount, &payment.refund_basis())?;
    payment.apply_refund(&split);
    effects.push(MarketEffect::Refund {
        payment_id: payment.id,
        charge_ref: payment.charge_ref.clone(),
        split,
        reason: reason.to_string(),
        idempotency_key,
    });
    if earnings_recorded {
        effects.push(MarketEffect::ReduceEarnings {
            payment_id: payment.id,
            provider_share: split.provider_amount,
        });
    }
    Ok(payment.is_fully_refunded())
}

fn resolve_dispute(
    booking: &mut Booking,
    refund: Money,
    note: String,
    policy: &FeePolicy,
    now: DateTime<Utc>,
) -> Result<Effects, DomainError> {
    if !matches!(booking.status, BookingStatus::Disputed | BookingStatus::PartiallyRefunded) {
        return Err(DomainError::transition(ENTITY, booking.status, "resolve_dispute"));
    }
    let refundable = booking.payment.as_ref().map_or(Money::ZERO, PaymentRecord::refundable);
    if refund > refundable {
        return Err(DomainError::Split(crate::split::SplitError::RefundExceedsCharge {
            refund,
            refundable,
        }));
    }
    let next = if refund.is_zero() {
        BookingStatus::Completed
    } else if refund == refundable {
        BookingStatus::Refunded
    } else {
        BookingStatus::PartiallyRefunded
    };
    booking.require_transition(next)?;

    // Validate on a copy so a failed refund leaves the booking untouched.
    let mut updated = booking.clone();
    let mut effects: Effects = SmallVec::new();
    if next != BookingStatus::Refunded {
        if let Some(draft) = earnings_draft(&updated, policy)? {
            updated.earnings_recorded = true;
            effects.push(MarketEffect::CreateEarnings(draft));
        }
    }
    refund_captured(&mut updated, Some(refund), &note, &mut effects)?;
    if next != BookingStatus::Refunded {
        effects.push(MarketEffect::TransferEarnings {
            subject: updated.subject(),
        });
    }
    updated.status = next;
    if let Some(dispute) = updated.dispute.as_mut() {
        dispute.resolution = Some(note);
    }
    updated.updated_at = now;
    effects.extend(updated.notify_both(NotificationKind::DisputeResolved));
    *booking = updated;
    Ok(effects)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::availability::ScheduleWindow;
    use crate::money::Currency;
    use crate::environment::Clock;
    use chrono::{NaiveTime, TimeZone, Weekday};
    use std::sync::Arc;

    struct Frozen(DateTime<Utc>);

    impl Clock for Frozen {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn env() -> MarketEnvironment {
        MarketEnvironment::new(Arc::new(Frozen(now())), FeePolicy::default())
    }

    fn requested() -> Booking {
        Booking::request(
            BookingRequest {
                customer_id: customer_id(),
                provider_id: provider_id(),
                service_id: ServiceId::new(),
                // Monday 10:00
                scheduled_start: Utc.with_ymd_and_hms(2030, 1, 7, 10, 0, 0).unwrap(),
                duration_minutes: 60,
                price: Money::from_cents(10_000),
            },
            now(),
        )
        .unwrap()
    }

    fn customer_id() -> UserId {
        UserId::from_uuid(uuid::Uuid::from_u128(1))
    }

    fn provider_id() -> UserId {
        UserId::from_uuid(uuid::Uuid::from_u128(2))
    }

    fn customer() -> Actor {
        Actor::customer(customer_id())
    }

    fn provider() -> Actor {
        Actor::provider(provider_id())
    }

    fn split_of(cents: u64, fee: u64) -> PaymentSplit {
        PaymentSplit {
            total_charge: Money::from_cents(cents),
            platform_fee: Money::from_cents(fee),
            provider_amount: Money::from_cents(cents - fee),
            currency: Currency::Nzd,
        }
    }

    fn apply(booking: &mut Booking, action: BookingAction) -> Result<Effects, DomainError> {
        BookingReducer.reduce(booking, action, &env())
    }

    fn paid() -> Booking {
        let mut booking = requested();
        apply(&mut booking, BookingAction::Accept { actor: provider() }).unwrap();
        apply(
            &mut booking,
            BookingAction::PaymentCaptured {
                payment_id: PaymentId::new(),
                charge_ref: "pi_1".to_string(),
                split: split_of(10_000, 1_000),
            },
        )
        .unwrap();
        booking
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use BookingStatus::*;
        assert!(Requested.can_transition_to(Accepted));
        assert!(Paid.can_transition_to(Disputed));
        assert!(PartiallyRefunded.can_transition_to(Refunded));
        assert!(!Accepted.can_transition_to(Reviewed));
        assert!(!Reviewed.can_transition_to(Disputed));
        assert!(!CanceledCustomer.can_transition_to(Accepted));
        assert!(!Completed.can_transition_to(CanceledCustomer));
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        use BookingStatus::*;
        let all = [
            Requested,
            Accepted,
            Paid,
            CompletedByProvider,
            Completed,
            Reviewed,
            CanceledCustomer,
            CanceledProvider,
            Disputed,
            Refunded,
            PartiallyRefunded,
        ];
        for from in all.into_iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)), "{from} is terminal");
        }
        for status in all {
            assert_eq!(status.as_str().parse::<BookingStatus>(), Ok(status));
        }
    }

    #[test]
    fn only_the_provider_accepts() {
        let mut booking = requested();
        let err = apply(&mut booking, BookingAction::Accept { actor: customer() }).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        assert_eq!(booking.status, BookingStatus::Requested);
    }

    #[test]
    fn payment_request_uses_quoted_price() {
        let mut booking = requested();
        apply(
            &mut booking,
            BookingAction::SetQuote {
                actor: provider(),
                price: Money::from_cents(12_000),
            },
        )
        .unwrap();
        apply(&mut booking, BookingAction::Accept { actor: provider() }).unwrap();

        let effects = apply(
            &mut booking,
            BookingAction::RequestPayment {
                actor: customer(),
                plan_tier: PlanTier::Starter,
                payment_method: None,
            },
        )
        .unwrap();

        let MarketEffect::Charge { split, idempotency_key, .. } = &effects[0] else {
            panic!("expected a charge, got {effects:?}");
        };
        assert_eq!(split.total_charge, Money::from_cents(12_000));
        assert_eq!(split.platform_fee, Money::from_cents(1_200));
        assert_eq!(idempotency_key, &format!("booking-{}-charge-0-12000-default", booking.id));
        assert_eq!(booking.status, BookingStatus::Accepted);
    }

    #[test]
    fn payment_below_minimum_is_rejected() {
        let mut booking = Booking {
            price_at_booking: Money::from_cents(99),
            status: BookingStatus::Accepted,
            ..requested()
        };
        let err = apply(
            &mut booking,
            BookingAction::RequestPayment {
                actor: customer(),
                plan_tier: PlanTier::Starter,
                payment_method: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some("below_minimum_charge"));
    }

    #[test]
    fn duplicate_capture_report_is_a_no_op() {
        let mut booking = paid();
        let before = booking.clone();
        let effects = apply(
            &mut booking,
            BookingAction::PaymentCaptured {
                payment_id: PaymentId::new(),
                charge_ref: "pi_1".to_string(),
                split: split_of(10_000, 1_000),
            },
        )
        .unwrap();
        assert!(effects.is_empty());
        assert_eq!(booking, before);
    }

    #[test]
    fn completion_creates_held_earnings_and_confirm_transfers_once() {
        let mut booking = paid();
        let effects = apply(&mut booking, BookingAction::MarkCompleted { actor: provider() }).unwrap();
        assert!(matches!(
            &effects[0],
            MarketEffect::CreateEarnings(draft) if draft.net == Money::from_cents(9_000)
        ));
        assert!(booking.earnings_recorded);

        let first = apply(&mut booking, BookingAction::ConfirmCompletion { actor: customer() }).unwrap();
        assert!(first.iter().any(|e| matches!(e, MarketEffect::TransferEarnings { .. })));
        let second = apply(&mut booking, BookingAction::ConfirmCompletion { actor: customer() }).unwrap();
        assert!(second.is_empty());
        assert_eq!(booking.status, BookingStatus::Completed);
    }

    #[test]
    fn system_may_auto_confirm() {
        let mut booking = paid();
        apply(&mut booking, BookingAction::MarkCompleted { actor: provider() }).unwrap();
        apply(&mut booking, BookingAction::ConfirmCompletion { actor: Actor::system() }).unwrap();
        assert_eq!(booking.status, BookingStatus::Completed);
    }

    #[test]
    fn illegal_transition_leaves_booking_unchanged() {
        let mut booking = requested();
        apply(&mut booking, BookingAction::Accept { actor: provider() }).unwrap();
        let before = booking.clone();
        let err = apply(
            &mut booking,
            BookingAction::Review {
                actor: customer(),
                rating: 5,
                comment: None,
            },
        )
        .unwrap_err();
        assert_eq!(err, DomainError::transition("booking", "accepted", "reviewed"));
        assert_eq!(booking, before);
    }

    #[test]
    fn cancel_after_payment_refunds_the_charge() {
        let mut booking = paid();
        let key = booking.refund_idempotency_key();
        let effects = apply(
            &mut booking,
            BookingAction::Cancel {
                actor: customer(),
                side: None,
                reason: "changed plans".to_string(),
            },
        )
        .unwrap();
        assert_eq!(booking.status, BookingStatus::CanceledCustomer);
        let MarketEffect::Refund { split, idempotency_key, .. } = &effects[0] else {
            panic!("expected a refund, got {effects:?}");
        };
        assert_eq!(split.refund_amount, Money::from_cents(10_000));
        assert_eq!(split.platform_fee, Money::from_cents(1_000));
        assert_eq!(idempotency_key, &key);
        assert!(booking.payment.as_ref().unwrap().is_fully_refunded());
    }

    #[test]
    fn admin_cancel_requires_a_side() {
        let mut booking = requested();
        let admin = Actor::admin(UserId::new());
        let err = apply(
            &mut booking,
            BookingAction::Cancel {
                actor: admin,
                side: None,
                reason: String::new(),
            },
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some("cancel_side_required"));

        apply(
            &mut booking,
            BookingAction::Cancel {
                actor: admin,
                side: Some(Party::Provider),
                reason: "no show".to_string(),
            },
        )
        .unwrap();
        assert_eq!(booking.status, BookingStatus::CanceledProvider);
    }

    #[test]
    fn partial_dispute_refund_reduces_and_releases_earnings() {
        let mut booking = paid();
        apply(&mut booking, BookingAction::MarkCompleted { actor: provider() }).unwrap();
        apply(
            &mut booking,
            BookingAction::OpenDispute {
                actor: customer(),
                reason: "half done".to_string(),
            },
        )
        .unwrap();

        let effects = apply(
            &mut booking,
            BookingAction::ResolveDispute {
                actor: Actor::admin(UserId::new()),
                refund: Money::from_cents(4_000),
                note: "partial".to_string(),
            },
        )
        .unwrap();
        assert_eq!(booking.status, BookingStatus::PartiallyRefunded);
        assert!(effects.iter().any(|e| matches!(
            e,
            MarketEffect::ReduceEarnings { provider_share, .. } if *provider_share == Money::from_cents(3_600)
        )));
        assert!(effects.iter().any(|e| matches!(e, MarketEffect::TransferEarnings { .. })));
    }

    #[test]
    fn dispute_resolution_without_refund_completes_and_creates_missing_earnings() {
        let mut booking = paid();
        apply(
            &mut booking,
            BookingAction::OpenDispute {
                actor: provider(),
                reason: "customer unreachable".to_string(),
            },
        )
        .unwrap();
        let effects = apply(
            &mut booking,
            BookingAction::ResolveDispute {
                actor: Actor::admin(UserId::new()),
                refund: Money::ZERO,
                note: "provider upheld".to_string(),
            },
        )
        .unwrap();
        assert_eq!(booking.status, BookingStatus::Completed);
        assert!(matches!(effects[0], MarketEffect::CreateEarnings(_)));
        assert!(matches!(effects[1], MarketEffect::TransferEarnings { .. }));
    }

    #[test]
    fn excessive_dispute_refund_is_rejected_without_change() {
        let mut booking = paid();
        apply(
            &mut booking,
            BookingAction::OpenDispute {
                actor: customer(),
                reason: "bad".to_string(),
            },
        )
        .unwrap();
        let before = booking.clone();
        let err = apply(
            &mut booking,
            BookingAction::ResolveDispute {
                actor: Actor::admin(UserId::new()),
                refund: Money::from_cents(10_001),
                note: String::new(),
            },
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some("refund_exceeds_charge"));
        assert_eq!(booking, before);
    }

    #[test]
    fn review_once_with_valid_rating() {
        let mut booking = paid();
        apply(&mut booking, BookingAction::MarkCompleted { actor: provider() }).unwrap();
        apply(&mut booking, BookingAction::ConfirmCompletion { actor: customer() }).unwrap();

        let err = apply(
            &mut booking,
            BookingAction::Review {
                actor: customer(),
                rating: 6,
                comment: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some("invalid_rating"));

        apply(
            &mut booking,
            BookingAction::Review {
                actor: customer(),
                rating: 4,
                comment: Some("good".to_string()),
            },
        )
        .unwrap();
        let again = apply(
            &mut booking,
            BookingAction::Review {
                actor: customer(),
                rating: 5,
                comment: None,
            },
        );
        assert!(matches!(again, Err(DomainError::InvalidTransition { .. })));
    }

    fn open_week() -> ProviderAvailability {
        ProviderAvailability {
            weekly: [Weekday::Mon, Weekday::Tue]
                .into_iter()
                .map(|weekday| ScheduleWindow {
                    weekday,
                    start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                })
                .collect(),
            ..ProviderAvailability::default()
        }
    }

    #[test]
    fn reschedule_round_trip_keeps_status() {
        let mut booking = paid();
        let new_start = Utc.with_ymd_and_hms(2030, 1, 8, 14, 0, 0).unwrap();
        apply(
            &mut booking,
            BookingAction::ProposeReschedule {
                actor: customer(),
                proposed_start: new_start,
                availability: open_week(),
            },
        )
        .unwrap();

        let second = apply(
            &mut booking,
            BookingAction::ProposeReschedule {
                actor: provider(),
                proposed_start: new_start,
                availability: open_week(),
            },
        );
        assert!(matches!(second, Err(DomainError::Conflict(_))));

        let own_answer = apply(
            &mut booking,
            BookingAction::RespondReschedule {
                actor: customer(),
                approve: true,
            },
        );
        assert!(matches!(own_answer, Err(DomainError::Forbidden(_))));

        apply(
            &mut booking,
            BookingAction::RespondReschedule {
                actor: provider(),
                approve: true,
            },
        )
        .unwrap();
        assert_eq!(booking.scheduled_start, new_start);
        assert_eq!(booking.status, BookingStatus::Paid);
    }

    #[test]
    fn reschedule_outside_schedule_is_rejected() {
        let mut booking = paid();
        let err = apply(
            &mut booking,
            BookingAction::ProposeReschedule {
                actor: customer(),
                // Saturday
                proposed_start: Utc.with_ymd_and_hms(2030, 1, 12, 10, 0, 0).unwrap(),
                availability: open_week(),
            },
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some("outside_schedule"));
        assert!(booking.reschedule.is_none());
    }

    #[test]
    fn far_future_starts_are_rejected_without_overflow() {
        let far = DateTime::<Utc>::MAX_UTC - chrono::Duration::minutes(1);
        let err = Booking::request(
            BookingRequest {
                customer_id: customer_id(),
                provider_id: provider_id(),
                service_id: ServiceId::new(),
                scheduled_start: far,
                duration_minutes: MAX_DURATION_MINUTES,
                price: Money::from_cents(10_000),
            },
            now(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some("slot_out_of_range"));

        let mut booking = paid();
        let err = apply(
            &mut booking,
            BookingAction::ProposeReschedule {
                actor: customer(),
                proposed_start: far,
                availability: open_week(),
            },
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some("slot_out_of_range"));
        assert!(booking.reschedule.is_none());

        booking.scheduled_start = far;
        assert_eq!(booking.scheduled_end(), DateTime::<Utc>::MAX_UTC);
    }

    fn accepted() -> Booking {
        let mut booking = requested();
        apply(&mut booking, BookingAction::Accept { actor: provider() }).unwrap();
        booking
    }

    fn request_payment(booking: &mut Booking, payment_method: Option<&str>) -> Effects {
        apply(
            booking,
            BookingAction::RequestPayment {
                actor: customer(),
                plan_tier: PlanTier::Starter,
                payment_method: payment_method.map(str::to_string),
            },
        )
        .unwrap()
    }

    fn hold_charge(booking: &mut Booking, effects: &Effects, charge_ref: &str) {
        let Some(MarketEffect::Charge {
            phase,
            split,
            idempotency_key,
            ..
        }) = effects.iter().find(|e| matches!(e, MarketEffect::Charge { .. }))
        else {
            panic!("expected a charge, got {effects:?}");
        };
        let pending = PendingCharge {
            charge_ref: charge_ref.to_string(),
            phase: *phase,
            split: *split,
            idempotency_key: idempotency_key.clone(),
            created_at: now(),
        };
        apply(booking, BookingAction::ChargePending { pending }).unwrap();
    }

    fn charge_key_of(effects: &Effects) -> &str {
        effects
            .iter()
            .find_map(|e| match e {
                MarketEffect::Charge { idempotency_key, .. } => Some(idempotency_key.as_str()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("expected a charge, got {effects:?}"))
    }

    #[test]
    fn paying_with_another_card_voids_the_pending_charge() {
        let mut booking = accepted();
        let first = request_payment(&mut booking, Some("pm_visa"));
        hold_charge(&mut booking, &first, "pi_visa");
        assert_eq!(booking.pending_charge.as_ref().unwrap().charge_ref, "pi_visa");

        // Same card again replays the pending charge
        let replay = request_payment(&mut booking, Some("pm_visa"));
        assert_eq!(replay.len(), 1);
        assert_eq!(charge_key_of(&replay), charge_key_of(&first));

        let switched = request_payment(&mut booking, Some("pm_amex"));
        assert!(matches!(
            &switched[0],
            MarketEffect::VoidCharge { charge_ref, idempotency_key, .. }
                if charge_ref == "pi_visa" && idempotency_key == &format!("booking-{}-void-pi_visa", booking.id)
        ));
        assert_ne!(charge_key_of(&switched), charge_key_of(&first));
        assert!(charge_key_of(&switched).starts_with(&format!("booking-{}-charge-1-", booking.id)));
        assert!(booking.pending_charge.is_none());
        assert_eq!(booking.charge_attempts, 1);
        assert_eq!(booking.status, BookingStatus::Accepted);
    }

    #[test]
    fn refused_charge_gets_a_new_key_on_retry() {
        let mut booking = accepted();
        let first = request_payment(&mut booking, Some("pm_visa"));
        apply(&mut booking, BookingAction::ChargeFailed).unwrap();
        let retry = request_payment(&mut booking, Some("pm_visa"));
        assert_ne!(charge_key_of(&first), charge_key_of(&retry));
        assert_eq!(retry.len(), 1);
    }

    #[test]
    fn cancel_voids_pending_charge_and_late_capture_is_refunded() {
        let mut booking = accepted();
        let charge = request_payment(&mut booking, None);
        hold_charge(&mut booking, &charge, "pi_pending");

        let effects = apply(
            &mut booking,
            BookingAction::Cancel {
                actor: customer(),
                side: None,
                reason: "found someone sooner".to_string(),
            },
        )
        .unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, MarketEffect::VoidCharge { charge_ref, .. } if charge_ref == "pi_pending")));
        assert!(!effects.iter().any(|e| matches!(e, MarketEffect::Refund { .. })));
        assert!(booking.pending_charge.is_none());
        assert_eq!(booking.status, BookingStatus::CanceledCustomer);

        // The customer finished authentication before the void landed
        let effects = apply(
            &mut booking,
            BookingAction::PaymentCaptured {
                payment_id: PaymentId::new(),
                charge_ref: "pi_pending".to_string(),
                split: split_of(10_000, 1_000),
            },
        )
        .unwrap();
        let [MarketEffect::Refund {
            split,
            idempotency_key,
            ..
        }] = effects.as_slice()
        else {
            panic!("expected a single refund, got {effects:?}");
        };
        assert_eq!(split.refund_amount, Money::from_cents(10_000));
        assert_eq!(idempotency_key, &format!("booking-{}-late-capture-pi_pending", booking.id));
        assert_eq!(booking.status, BookingStatus::CanceledCustomer);
        assert!(booking.payment.as_ref().unwrap().is_fully_refunded());

        // Redelivery of the same capture does nothing
        let again = apply(
            &mut booking,
            BookingAction::PaymentCaptured {
                payment_id: PaymentId::new(),
                charge_ref: "pi_pending".to_string(),
                split: split_of(10_000, 1_000),
            },
        )
        .unwrap();
        assert!(again.is_empty());
    }
}
