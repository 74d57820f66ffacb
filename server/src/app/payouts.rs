//! Payout sweep, auto-confirmation and earnings queries.

use super::executor::PayoutResult;
use super::{MarketplaceService, ServiceError};
use crate::metrics;
use chrono::{DateTime, Utc};
use marketplace_core::actor::{Actor, Role};
use marketplace_core::booking::BookingAction;
use marketplace_core::earnings::{ProviderEarnings, MAX_PAYOUT_ATTEMPTS};
use marketplace_core::effect::{Notification, NotificationKind};
use marketplace_core::error::DomainError;
use marketplace_core::ids::BookingId;
use serde::Serialize;
use std::time::Duration;

/// Outcome of a payout sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PayoutReport {
    /// Rows picked up
    pub attempted: usize,
    /// Rows paid out
    pub paid: usize,
    /// Rows still awaiting payout
    pub failed: usize,
}

/// Outcome of an auto-confirm sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfirmReport {
    /// Bookings confirmed by the system
    pub confirmed: usize,
    /// Bookings that could not be confirmed this time
    pub failed: usize,
}

impl MarketplaceService {
    /// Retry transfers for earnings awaiting payout.
    ///
    /// Each row is saved after its attempt, so a crash mid-sweep loses at
    /// most one attempt count. The row's stable idempotency key prevents a
    /// double payout when a transfer succeeded but the save did not.
    ///
    /// # Errors
    ///
    /// Returns the store error if the due rows cannot be listed.
    #[tracing::instrument(skip(self))]
    pub async fn run_payout_sweep(&self, batch_size: u32) -> Result<PayoutReport, ServiceError> {
        let due = self.store.earnings_due_for_payout(MAX_PAYOUT_ATTEMPTS, batch_size).await?;
        if due.is_empty() {
            return Ok(PayoutReport::default());
        }
        let currency = self.policy().await?.currency;
        let mut report = PayoutReport {
            attempted: due.len(),
            ..PayoutReport::default()
        };

        for mut row in due {
            let result = self.pay_out(&mut row, currency, self.now()).await;
            let (provider_id, subject) = (row.provider_id, row.subject);
            if let Err(e) = self.store.save_earnings(row).await {
                tracing::error!(error = %e, %subject, "Failed to save earnings after payout attempt");
                report.failed += 1;
                continue;
            }
            if result == PayoutResult::Paid {
                report.paid += 1;
                self.publish_all(vec![Notification {
                    recipient: provider_id,
                    kind: NotificationKind::PayoutSent,
                    subject,
                }])
                .await;
            } else {
                report.failed += 1;
            }
        }

        tracing::info!(
            attempted = report.attempted,
            paid = report.paid,
            failed = report.failed,
            "Payout sweep finished"
        );
        Ok(report)
    }

    /// Confirm bookings left in `completed_by_provider` longer than `after`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the candidates cannot be listed. Failures
    /// on individual bookings are logged and counted.
    #[tracing::instrument(skip(self))]
    pub async fn auto_confirm(&self, after: Duration, batch_size: u32) -> Result<ConfirmReport, ServiceError> {
        let now = self.now();
        let cutoff = chrono::Duration::from_std(after)
            .ok()
            .and_then(|after| now.checked_sub_signed(after))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let due = self.store.bookings_awaiting_confirmation(cutoff, batch_size).await?;
        let mut report = ConfirmReport::default();
        let system = Actor::system();

        for id in due {
            let action = BookingAction::ConfirmCompletion { actor: system };
            match self.apply_booking_as_system(id, action).await {
                Ok(()) => report.confirmed += 1,
                Err(e) => {
                    tracing::warn!(error = %e, booking_id = %id, "Auto-confirm failed");
                    metrics::record_side_effect_failure("auto_confirm");
                    report.failed += 1;
                }
            }
        }

        if report.confirmed > 0 || report.failed > 0 {
            tracing::info!(confirmed = report.confirmed, failed = report.failed, "Auto-confirm sweep finished");
        }
        Ok(report)
    }

    async fn apply_booking_as_system(
        &self,
        id: BookingId,
        action: BookingAction,
    ) -> Result<(), ServiceError> {
        let booking = self.store.load_booking(id).await?;
        self.transition(booking, Actor::system(), action).await?;
        Ok(())
    }

    /// A provider's own earnings, newest first.
    ///
    /// # Errors
    ///
    /// Forbidden for non-providers.
    pub async fn provider_earnings(&self, actor: Actor) -> Result<Vec<ProviderEarnings>, ServiceError> {
        if actor.role != Role::Provider {
            return Err(DomainError::forbidden("only providers have earnings").into());
        }
        Ok(self.store.earnings_for_provider(actor.user_id).await?)
    }
}
