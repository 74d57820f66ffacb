//! Marketplace services.
//!
//! [`MarketplaceService`] is the only place that talks to the ports. Each
//! operation follows the same pipeline:
//!
//! 1. load the entity and the fee policy in force
//! 2. run the reducer (authorization and transition checks happen here)
//! 3. execute processor effects with their idempotency keys
//! 4. commit the entity, earnings and refunds in one store transaction
//! 5. publish notifications and append the audit entry, best effort
//!
//! A failed processor call aborts before the commit, so nothing is written
//! for a transition whose charge or refund did not go through. Transfers are
//! the exception: a failed payout is recorded on the earnings row and left
//! for the payout sweep.

use crate::metrics;
use crate::webhook::WebhookError;
use marketplace_core::actor::Actor;
use marketplace_core::earnings::Subject;
use marketplace_core::effect::Notification;
use marketplace_core::environment::{Clock, MarketEnvironment};
use marketplace_core::error::DomainError;
use marketplace_core::payment::AuditEntry;
use marketplace_core::ports::{MarketplaceStore, Notifier, PaymentError, PaymentProcessor, StoreError};
use marketplace_core::split::FeePolicy;
use std::sync::Arc;
use thiserror::Error;

mod admin;
mod bookings;
mod executor;
mod jobs;
mod payouts;
mod webhooks;

pub use bookings::{CreateBooking, PayOutcome, ProviderUpdate};
pub use jobs::{JobPayOutcome, PostJob, SubmitQuote};
pub use payouts::{ConfirmReport, PayoutReport};
pub use webhooks::WebhookOutcome;

/// Errors returned by service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Reducer rejected the action
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Store failure, including optimistic concurrency conflicts
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Processor call failed
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Webhook payload could not be interpreted
    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

/// Marketplace operations over the store, processor and notifier ports
#[derive(Clone)]
pub struct MarketplaceService {
    store: Arc<dyn MarketplaceStore>,
    processor: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    default_policy: FeePolicy,
}

impl std::fmt::Debug for MarketplaceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceService")
            .field("default_policy", &self.default_policy)
            .finish_non_exhaustive()
    }
}

impl MarketplaceService {
    /// Create a service.
    ///
    /// `default_policy` applies until an admin persists a fee policy.
    #[must_use]
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        default_policy: FeePolicy,
    ) -> Self {
        Self {
            store,
            processor,
            notifier,
            clock,
            default_policy,
        }
    }

    /// The store this service writes to
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MarketplaceStore> {
        &self.store
    }

    /// Fee policy in force: the persisted one, else the configured default
    async fn policy(&self) -> Result<FeePolicy, StoreError> {
        Ok(self
            .store
            .load_fee_policy()
            .await?
            .unwrap_or(self.default_policy))
    }

    async fn environment(&self) -> Result<MarketEnvironment, StoreError> {
        Ok(MarketEnvironment::new(Arc::clone(&self.clock), self.policy().await?))
    }

    async fn publish_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            if let Err(e) = self.notifier.publish(notification).await {
                tracing::warn!(
                    error = %e,
                    recipient = %notification.recipient,
                    subject = %notification.subject,
                    "Failed to publish notification"
                );
                metrics::record_side_effect_failure("notification");
            }
        }
    }

    async fn audit(&self, actor: Actor, subject: Subject, action: String, detail: serde_json::Value) {
        let entry = AuditEntry {
            actor,
            subject,
            action,
            detail,
            at: self.clock.now(),
        };
        if let Err(e) = self.store.append_audit(entry).await {
            tracing::warn!(error = %e, %subject, "Failed to append audit entry");
            metrics::record_side_effect_failure("audit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_testing::{test_clock, InMemoryStore, MockPaymentProcessor, RecordingNotifier};

    #[tokio::test]
    async fn persisted_policy_overrides_the_default() {
        let store = Arc::new(InMemoryStore::new());
        let service = MarketplaceService::new(
            store.clone(),
            Arc::new(MockPaymentProcessor::new()),
            Arc::new(RecordingNotifier::new()),
            Arc::new(test_clock()),
            FeePolicy::default(),
        );
        assert_eq!(service.policy().await, Ok(FeePolicy::default()));

        let custom = FeePolicy {
            starter_fee_bps: 1_200,
            ..FeePolicy::default()
        };
        store.save_fee_policy(custom).await.ok();
        assert_eq!(service.policy().await, Ok(custom));
    }
}
