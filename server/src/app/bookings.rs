//! Booking operations.

use super::executor::Transitioned;
use super::{MarketplaceService, ServiceError};
use chrono::{DateTime, Utc};
use marketplace_core::actor::{Actor, Party, Role};
use marketplace_core::booking::{Booking, BookingAction, BookingRequest};
use marketplace_core::error::DomainError;
use marketplace_core::ids::{BookingId, ServiceId, UserId};
use marketplace_core::money::Money;
use marketplace_core::ports::ChargeStatus;
use serde::{Deserialize, Serialize};

/// New booking request from a customer
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBooking {
    /// Provider being booked
    pub provider_id: UserId,
    /// Service being booked
    pub service_id: ServiceId,
    /// Desired start
    pub scheduled_start: DateTime<Utc>,
    /// Desired length
    pub duration_minutes: u32,
    /// Listed price in cents
    pub price_cents: u64,
}

/// Provider status update
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProviderUpdate {
    /// Accept the request
    Accept {
        /// Booking
        booking_id: BookingId,
    },
    /// Override the price
    Quote {
        /// Booking
        booking_id: BookingId,
        /// Quoted price in cents
        price_cents: u64,
    },
    /// Mark the work done
    Complete {
        /// Booking
        booking_id: BookingId,
    },
}

impl ProviderUpdate {
    const fn booking_id(&self) -> BookingId {
        match self {
            Self::Accept { booking_id } | Self::Quote { booking_id, .. } | Self::Complete { booking_id } => {
                *booking_id
            }
        }
    }

    fn into_action(self, actor: Actor) -> BookingAction {
        match self {
            Self::Accept { .. } => BookingAction::Accept { actor },
            Self::Quote { price_cents, .. } => BookingAction::SetQuote {
                actor,
                price: Money::from_cents(price_cents),
            },
            Self::Complete { .. } => BookingAction::MarkCompleted { actor },
        }
    }
}

/// Result of a payment request
#[derive(Debug, Clone, Serialize)]
pub struct PayOutcome {
    /// Booking after the request
    pub booking: Booking,
    /// Whether the charge was captured or awaits the customer
    pub payment_status: ChargeStatus,
    /// Secret the client uses to complete a pending charge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl MarketplaceService {
    /// Create a booking request.
    ///
    /// # Errors
    ///
    /// Forbidden for non-customers; validation errors for self-bookings,
    /// zero prices, bad durations and past slots.
    #[tracing::instrument(skip(self, request), fields(customer_id = %actor.user_id))]
    pub async fn create_booking(&self, actor: Actor, request: CreateBooking) -> Result<Booking, ServiceError> {
        if actor.role != Role::Customer {
            return Err(DomainError::forbidden("only customers may book services").into());
        }
        let booking = Booking::request(
            BookingRequest {
                customer_id: actor.user_id,
                provider_id: request.provider_id,
                service_id: request.service_id,
                scheduled_start: request.scheduled_start,
                duration_minutes: request.duration_minutes,
                price: Money::from_cents(request.price_cents),
            },
            self.now(),
        )?;
        self.store.insert_booking(booking.clone()).await?;
        tracing::info!(booking_id = %booking.id, provider_id = %booking.provider_id, "Booking requested");
        self.audit(
            actor,
            booking.subject(),
            "booking.create".to_string(),
            serde_json::json!({ "price": booking.price_at_booking.cents() }),
        )
        .await;
        Ok(booking)
    }

    /// Read a booking as one of its parties or an admin.
    ///
    /// # Errors
    ///
    /// Not found, or forbidden for anyone else.
    pub async fn booking(&self, actor: Actor, id: BookingId) -> Result<Booking, ServiceError> {
        let booking = self.store.load_booking(id).await?;
        if !actor.can_view(booking.customer_id, booking.provider_id) {
            return Err(DomainError::forbidden("not a party to this booking").into());
        }
        Ok(booking)
    }

    async fn apply_booking(
        &self,
        id: BookingId,
        actor: Actor,
        action: BookingAction,
    ) -> Result<Transitioned<Booking>, ServiceError> {
        let booking = self.store.load_booking(id).await?;
        self.transition(booking, actor, action).await
    }

    /// Charge the customer for an accepted booking.
    ///
    /// The booking becomes `paid` immediately when the processor captures
    /// the charge; otherwise it stays `accepted` until the capture webhook.
    ///
    /// # Errors
    ///
    /// Forbidden for anyone but the customer; conflict unless `accepted`;
    /// validation below the minimum charge; processor failures.
    pub async fn pay_booking(
        &self,
        actor: Actor,
        id: BookingId,
        payment_method: Option<String>,
    ) -> Result<PayOutcome, ServiceError> {
        let booking = self.store.load_booking(id).await?;
        let plan_tier = self.store.load_provider_profile(booking.provider_id).await?.plan_tier;
        let action = BookingAction::RequestPayment {
            actor,
            plan_tier,
            payment_method,
        };
        let done = self.transition(booking, actor, action).await?;
        let (payment_status, client_secret) = match done.charge {
            Some(charge) => (charge.status, charge.client_secret),
            None => (ChargeStatus::Succeeded, None),
        };
        Ok(PayOutcome {
            booking: done.entity,
            payment_status,
            client_secret,
        })
    }

    /// Cancel a booking, refunding any captured charge.
    ///
    /// # Errors
    ///
    /// Forbidden for non-parties; admins must name `side`; conflict outside
    /// `requested`, `accepted` and `paid`; refund failures.
    pub async fn cancel_booking(
        &self,
        actor: Actor,
        id: BookingId,
        side: Option<Party>,
        reason: String,
    ) -> Result<Booking, ServiceError> {
        let action = BookingAction::Cancel { actor, side, reason };
        Ok(self.apply_booking(id, actor, action).await?.entity)
    }

    /// Customer confirms the work; the provider's earnings are transferred.
    ///
    /// Confirming an already completed booking returns it unchanged. A
    /// failed transfer leaves the earnings `awaiting_payout` and the
    /// confirmation still succeeds.
    ///
    /// # Errors
    ///
    /// Forbidden for anyone but the customer; conflict unless
    /// `completed_by_provider`.
    pub async fn confirm_booking(&self, actor: Actor, id: BookingId) -> Result<Booking, ServiceError> {
        let action = BookingAction::ConfirmCompletion { actor };
        Ok(self.apply_booking(id, actor, action).await?.entity)
    }

    /// Open a dispute.
    ///
    /// # Errors
    ///
    /// Forbidden for non-parties; validation for a blank reason; conflict
    /// from other statuses.
    pub async fn dispute_booking(&self, actor: Actor, id: BookingId, reason: String) -> Result<Booking, ServiceError> {
        let action = BookingAction::OpenDispute { actor, reason };
        Ok(self.apply_booking(id, actor, action).await?.entity)
    }

    /// Review a completed booking.
    ///
    /// # Errors
    ///
    /// Forbidden for anyone but the customer; validation for ratings outside
    /// 1 to 5; conflict unless `completed`.
    pub async fn review_booking(
        &self,
        actor: Actor,
        id: BookingId,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Booking, ServiceError> {
        let action = BookingAction::Review { actor, rating, comment };
        Ok(self.apply_booking(id, actor, action).await?.entity)
    }

    /// Propose a new start time.
    ///
    /// # Errors
    ///
    /// Forbidden for non-parties; conflict when a proposal is pending or the
    /// booking is not `accepted`/`paid`; validation when the slot is
    /// unavailable.
    pub async fn propose_reschedule(
        &self,
        actor: Actor,
        id: BookingId,
        proposed_start: DateTime<Utc>,
    ) -> Result<Booking, ServiceError> {
        let booking = self.store.load_booking(id).await?;
        let availability = self.store.provider_availability(booking.provider_id).await?;
        let action = BookingAction::ProposeReschedule {
            actor,
            proposed_start,
            availability,
        };
        Ok(self.transition(booking, actor, action).await?.entity)
    }

    /// Approve or decline the pending proposal.
    ///
    /// # Errors
    ///
    /// Conflict when nothing is pending; forbidden for the proposer.
    pub async fn respond_reschedule(&self, actor: Actor, id: BookingId, approve: bool) -> Result<Booking, ServiceError> {
        let action = BookingAction::RespondReschedule { actor, approve };
        Ok(self.apply_booking(id, actor, action).await?.entity)
    }

    /// Provider accepts, quotes or completes a booking.
    ///
    /// # Errors
    ///
    /// Forbidden unless the caller is the booking's provider; conflict for
    /// illegal transitions.
    pub async fn provider_update(&self, actor: Actor, update: ProviderUpdate) -> Result<Booking, ServiceError> {
        if actor.role != Role::Provider {
            return Err(DomainError::forbidden("only providers may update booking status").into());
        }
        let id = update.booking_id();
        Ok(self.apply_booking(id, actor, update.into_action(actor)).await?.entity)
    }

    /// Admin resolves a dispute with a refund (zero releases the payout).
    ///
    /// # Errors
    ///
    /// Forbidden for non-admins; conflict unless disputed or partially
    /// refunded; validation when the refund exceeds what is refundable.
    pub async fn resolve_dispute(
        &self,
        actor: Actor,
        id: BookingId,
        refund: Money,
        note: String,
    ) -> Result<Booking, ServiceError> {
        let action = BookingAction::ResolveDispute { actor, refund, note };
        Ok(self.apply_booking(id, actor, action).await?.entity)
    }
}
