//! Processor webhook reconciliation.

use super::{MarketplaceService, ServiceError};
use crate::metrics;
use crate::webhook::{CapturedCharge, EventKind, WebhookEvent};
use marketplace_core::actor::Actor;
use marketplace_core::booking::BookingAction;
use marketplace_core::earnings::{PayoutStatus, Subject};
use marketplace_core::ids::PaymentId;
use marketplace_core::job::JobAction;
use serde::Serialize;

/// How a webhook event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Applied for the first time
    Processed,
    /// Seen before; handling was a no-op
    Duplicate,
    /// Event type the marketplace does not act on
    Ignored,
    /// Event referred to state that cannot accept it; acknowledged and logged
    Rejected,
}

impl WebhookOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::Rejected => "rejected",
        }
    }
}

impl MarketplaceService {
    /// Apply a verified processor event.
    ///
    /// The event is handled before it is recorded, so a handler failure
    /// leaves it unrecorded and the processor's retry applies it. Handlers
    /// are idempotent (captures by charge reference, payouts by transfer
    /// reference), so a replay finds nothing to do and is reported as
    /// [`WebhookOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// Store and processor failures, so the processor retries delivery.
    /// Domain rejections are acknowledged as [`WebhookOutcome::Rejected`].
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_webhook(&self, event: WebhookEvent) -> Result<WebhookOutcome, ServiceError> {
        let kind = event.kind()?;
        let handled = match kind {
            EventKind::PaymentCaptured(captured) => self.reconcile_capture(captured).await,
            EventKind::TransferPaid { transfer_ref } => self.reconcile_transfer(transfer_ref).await,
            EventKind::ChargeRefunded { charge_ref } => {
                tracing::info!(%charge_ref, "Processor reported a refund");
                Ok(WebhookOutcome::Processed)
            }
            EventKind::Ignored => Ok(WebhookOutcome::Ignored),
        };
        let outcome = match handled {
            Ok(outcome) => outcome,
            Err(ServiceError::Domain(e)) => {
                tracing::warn!(error = %e, "Webhook event rejected by the reducer");
                WebhookOutcome::Rejected
            }
            Err(e) => {
                metrics::record_webhook(event.event_type.clone(), "failed");
                return Err(e);
            }
        };

        let first_delivery = self
            .store
            .record_webhook_event(event.id.clone(), event.event_type.clone())
            .await?;
        let outcome = if first_delivery || outcome != WebhookOutcome::Processed {
            outcome
        } else {
            tracing::debug!("Webhook replay acknowledged");
            WebhookOutcome::Duplicate
        };
        metrics::record_webhook(event.event_type, outcome.as_str());
        Ok(outcome)
    }

    async fn reconcile_capture(&self, captured: CapturedCharge) -> Result<WebhookOutcome, ServiceError> {
        let system = Actor::system();
        let CapturedCharge {
            charge_ref,
            subject,
            phase,
            split,
        } = captured;
        match subject {
            Subject::Booking(id) => {
                let booking = self.store.load_booking(id).await?;
                let action = BookingAction::PaymentCaptured {
                    payment_id: PaymentId::new(),
                    charge_ref,
                    split,
                };
                self.transition(booking, system, action).await?;
            }
            Subject::Job(id) => {
                let job = self.store.load_job(id).await?;
                let action = JobAction::PaymentCaptured {
                    payment_id: PaymentId::new(),
                    phase,
                    charge_ref,
                    split,
                };
                self.transition(job, system, action).await?;
            }
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn reconcile_transfer(&self, transfer_ref: String) -> Result<WebhookOutcome, ServiceError> {
        let Some(mut row) = self.store.find_earnings_by_transfer(transfer_ref.clone()).await? else {
            tracing::warn!(%transfer_ref, "Transfer does not match any earnings row");
            return Ok(WebhookOutcome::Ignored);
        };
        if row.status != PayoutStatus::PaidOut {
            row.mark_paid_out(transfer_ref, self.now());
            self.store.save_earnings(row).await?;
        }
        Ok(WebhookOutcome::Processed)
    }
}
