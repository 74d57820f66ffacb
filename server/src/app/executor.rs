//! Effect execution and commit for booking and job transitions.

use super::{MarketplaceService, ServiceError};
use crate::metrics;
use chrono::{DateTime, Utc};
use marketplace_core::actor::Actor;
use marketplace_core::booking::{Booking, BookingAction, BookingReducer, BookingStatus};
use marketplace_core::earnings::{ProviderEarnings, Subject};
use marketplace_core::effect::{MarketEffect, Notification, NotificationKind};
use marketplace_core::environment::{Clock, MarketEnvironment};
use marketplace_core::error::DomainError;
use marketplace_core::ids::{PaymentId, RefundId, UserId};
use marketplace_core::job::{JobAction, JobReducer, JobRequest, JobStatus};
use marketplace_core::money::Currency;
use marketplace_core::payment::{PendingCharge, RefundRecord};
use marketplace_core::ports::{
    BookingCommit, ChargeOutcome, ChargeRequest, ChargeStatus, JobCommit, MarketplaceStore,
    PaymentError, PortFuture, RefundRequest, StoreError, TransferRequest, VoidRequest,
};
use marketplace_core::reducer::Reducer;
use marketplace_core::split::{PaymentPhase, PaymentSplit};
use marketplace_core::SmallVec;
use std::collections::VecDeque;

type Effects = SmallVec<[MarketEffect; 4]>;

/// An entity driven through reducer, processor and store
pub(super) trait Ledgered: Clone + PartialEq + Send + Sync + 'static {
    type Action: Send;
    type Status: Copy + PartialEq + Send + Sync;

    const ENTITY: &'static str;

    fn subject(&self) -> Subject;
    fn customer_id(&self) -> UserId;
    fn status(&self) -> Self::Status;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
    fn status_name(status: Self::Status) -> &'static str;
    fn action_name(action: &Self::Action) -> &'static str;
    fn captured(payment_id: PaymentId, phase: PaymentPhase, charge_ref: String, split: PaymentSplit) -> Self::Action;
    fn pending(pending: PendingCharge) -> Self::Action;
    fn charge_failed() -> Self::Action;
    fn apply(&mut self, action: Self::Action, env: &MarketEnvironment) -> Result<Effects, DomainError>;
    fn commit(store: &dyn MarketplaceStore, write: Staged<Self>) -> PortFuture<'_, (), StoreError>;
}

/// One commit's worth of changes
pub(super) struct Staged<E: Ledgered> {
    entity: E,
    expected_status: E::Status,
    expected_version: u64,
    earnings: Vec<ProviderEarnings>,
    refunds: Vec<RefundRecord>,
}

impl Ledgered for Booking {
    type Action = BookingAction;
    type Status = BookingStatus;

    const ENTITY: &'static str = "booking";

    fn subject(&self) -> Subject {
        Self::subject(self)
    }

    fn customer_id(&self) -> UserId {
        self.customer_id
    }

    fn status(&self) -> BookingStatus {
        self.status
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn status_name(status: BookingStatus) -> &'static str {
        status.as_str()
    }

    fn action_name(action: &BookingAction) -> &'static str {
        action.name()
    }

    fn captured(payment_id: PaymentId, _phase: PaymentPhase, charge_ref: String, split: PaymentSplit) -> BookingAction {
        BookingAction::PaymentCaptured {
            payment_id,
            charge_ref,
            split,
        }
    }

    fn pending(pending: PendingCharge) -> BookingAction {
        BookingAction::ChargePending { pending }
    }

    fn charge_failed() -> BookingAction {
        BookingAction::ChargeFailed
    }

    fn apply(&mut self, action: BookingAction, env: &MarketEnvironment) -> Result<Effects, DomainError> {
        BookingReducer.reduce(self, action, env)
    }

    fn commit(store: &dyn MarketplaceStore, write: Staged<Self>) -> PortFuture<'_, (), StoreError> {
        store.commit_booking(BookingCommit {
            booking: write.entity,
            expected_status: write.expected_status,
            expected_version: write.expected_version,
            earnings: write.earnings,
            refunds: write.refunds,
        })
    }
}

impl Ledgered for JobRequest {
    type Action = JobAction;
    type Status = JobStatus;

    const ENTITY: &'static str = "job";

    fn subject(&self) -> Subject {
        Self::subject(self)
    }

    fn customer_id(&self) -> UserId {
        self.customer_id
    }

    fn status(&self) -> JobStatus {
        self.status
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn status_name(status: JobStatus) -> &'static str {
        status.as_str()
    }

    fn action_name(action: &JobAction) -> &'static str {
        action.name()
    }

    fn captured(payment_id: PaymentId, phase: PaymentPhase, charge_ref: String, split: PaymentSplit) -> JobAction {
        JobAction::PaymentCaptured {
            payment_id,
            phase,
            charge_ref,
            split,
        }
    }

    fn pending(pending: PendingCharge) -> JobAction {
        JobAction::ChargePending { pending }
    }

    fn charge_failed() -> JobAction {
        JobAction::ChargeFailed
    }

    fn apply(&mut self, action: JobAction, env: &MarketEnvironment) -> Result<Effects, DomainError> {
        JobReducer.reduce(self, action, env)
    }

    fn commit(store: &dyn MarketplaceStore, write: Staged<Self>) -> PortFuture<'_, (), StoreError> {
        store.commit_job(JobCommit {
            job: write.entity,
            expected_status: write.expected_status,
            expected_version: write.expected_version,
            earnings: write.earnings,
            refunds: write.refunds,
        })
    }
}

/// Result of a transition
#[derive(Debug, Clone)]
pub(super) struct Transitioned<E> {
    /// Entity as committed (or as loaded when nothing changed)
    pub entity: E,
    /// Charge created by this transition, captured or pending
    pub charge: Option<ChargeOutcome>,
}

/// Outcome of one transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PayoutResult {
    Paid,
    Failed,
    NotConfigured,
}

#[derive(Debug, Default)]
struct Execution {
    earnings: Vec<ProviderEarnings>,
    refunds: Vec<RefundRecord>,
    notifications: Vec<Notification>,
    charge: Option<ChargeOutcome>,
    refused: Option<PaymentError>,
}

impl Execution {
    fn upsert(&mut self, row: ProviderEarnings) {
        match self.earnings.iter_mut().find(|existing| existing.id == row.id) {
            Some(existing) => *existing = row,
            None => self.earnings.push(row),
        }
    }

    fn is_empty(&self) -> bool {
        self.earnings.is_empty() && self.refunds.is_empty()
    }
}

const fn charge_failure_reason(err: &PaymentError) -> &'static str {
    match err {
        PaymentError::Declined(_) => "declined",
        PaymentError::InsufficientBalance => "insufficient_balance",
        PaymentError::NotConfigured(_) => "not_configured",
        PaymentError::Upstream { .. } => "upstream",
        PaymentError::InvalidResponse(_) => "invalid_response",
    }
}

impl MarketplaceService {
    /// Apply an action to a loaded entity and persist the outcome.
    ///
    /// # Errors
    ///
    /// Reducer rejections, processor failures on charges, voids and refunds,
    /// and store failures (a concurrent modification is a
    /// [`StoreError::Conflict`]) are returned with nothing committed. A charge
    /// the processor refused is the exception: the bumped attempt counter is
    /// committed before the refusal is returned, so the next attempt goes out
    /// under a new idempotency key.
    #[tracing::instrument(
        skip_all,
        fields(entity = E::ENTITY, subject = %entity.subject(), action = E::action_name(&action), actor = %actor.user_id)
    )]
    pub(super) async fn transition<E: Ledgered>(
        &self,
        mut entity: E,
        actor: Actor,
        action: E::Action,
    ) -> Result<Transitioned<E>, ServiceError> {
        let env = self.environment().await?;
        let before = entity.clone();
        let from = entity.status();
        let action_name = E::action_name(&action);

        let effects = entity.apply(action, &env).map_err(|e| {
            tracing::debug!(error = %e, "Action rejected");
            e
        })?;
        if effects.is_empty() && entity == before {
            tracing::debug!("Action was a no-op");
            return Ok(Transitioned { entity, charge: None });
        }

        let mut execution = self.execute(&mut entity, effects, &env).await?;
        let refused = execution.refused.take();
        if entity == before && execution.is_empty() {
            return match refused {
                Some(e) => Err(e.into()),
                None => Ok(Transitioned {
                    entity,
                    charge: execution.charge,
                }),
            };
        }

        let to = entity.status();
        let expected_version = before.version();
        entity.set_version(expected_version.saturating_add(1));
        E::commit(
            self.store.as_ref(),
            Staged {
                entity: entity.clone(),
                expected_status: from,
                expected_version,
                earnings: execution.earnings,
                refunds: execution.refunds,
            },
        )
        .await?;
        if let Some(e) = refused {
            tracing::info!(error = %e, "Charge refused; attempt recorded");
            return Err(e.into());
        }

        if to != from {
            metrics::record_transition(E::ENTITY, E::status_name(from), E::status_name(to));
            tracing::info!(from = E::status_name(from), to = E::status_name(to), "Transition committed");
        }
        self.publish_all(execution.notifications).await;
        self.audit(
            actor,
            entity.subject(),
            format!("{}.{action_name}", E::ENTITY),
            serde_json::json!({
                "from": E::status_name(from),
                "to": E::status_name(to),
            }),
        )
        .await;

        Ok(Transitioned {
            entity,
            charge: execution.charge,
        })
    }

    async fn execute<E: Ledgered>(
        &self,
        entity: &mut E,
        effects: Effects,
        env: &MarketEnvironment,
    ) -> Result<Execution, ServiceError> {
        let now = env.clock.now();
        let mut execution = Execution::default();
        let mut queue: VecDeque<MarketEffect> = effects.into_iter().collect();

        while let Some(effect) = queue.pop_front() {
            match effect {
                MarketEffect::Charge {
                    subject,
                    phase,
                    split,
                    payment_method,
                    idempotency_key,
                } => {
                    let request = ChargeRequest {
                        subject,
                        phase,
                        customer_id: entity.customer_id(),
                        amount: split.total_charge,
                        platform_fee: split.platform_fee,
                        currency: split.currency,
                        payment_method,
                        idempotency_key: idempotency_key.clone(),
                    };
                    let outcome = match self.processor.charge(request).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            metrics::record_charge_failed(charge_failure_reason(&e));
                            if !e.is_refusal() {
                                return Err(e.into());
                            }
                            queue.extend(entity.apply(E::charge_failed(), env)?);
                            execution.refused = Some(e);
                            break;
                        }
                    };
                    match outcome.status {
                        ChargeStatus::Succeeded => {
                            metrics::record_charge_captured(split.total_charge.cents(), split.platform_fee.cents());
                            let captured = E::captured(PaymentId::new(), phase, outcome.charge_ref.clone(), split);
                            queue.extend(entity.apply(captured, env)?);
                        }
                        ChargeStatus::Pending => {
                            metrics::record_charge_pending();
                            tracing::info!(charge_ref = %outcome.charge_ref, "Charge awaiting customer action");
                            let pending = PendingCharge {
                                charge_ref: outcome.charge_ref.clone(),
                                phase,
                                split,
                                idempotency_key,
                                created_at: now,
                            };
                            queue.extend(entity.apply(E::pending(pending), env)?);
                        }
                    }
                    execution.charge = Some(outcome);
                }

                MarketEffect::VoidCharge {
                    subject,
                    charge_ref,
                    idempotency_key,
                } => {
                    self.processor
                        .void_charge(VoidRequest {
                            charge_ref: charge_ref.clone(),
                            idempotency_key,
                        })
                        .await?;
                    metrics::record_charge_voided();
                    tracing::info!(%subject, %charge_ref, "Pending charge voided");
                }

                MarketEffect::Refund {
                    payment_id,
                    charge_ref,
                    split,
                    reason,
                    idempotency_key,
                } => {
                    let result = self
                        .processor
                        .refund(RefundRequest {
                            charge_ref,
                            amount: split.refund_amount,
                            reason: reason.clone(),
                            idempotency_key,
                        })
                        .await;
                    metrics::record_refund(split.refund_amount.cents(), result.is_ok());
                    let outcome = result?;
                    execution.refunds.push(RefundRecord {
                        id: RefundId::new(),
                        payment_id,
                        refund_ref: outcome.refund_ref,
                        split,
                        reason,
                        created_at: now,
                    });
                }

                MarketEffect::CreateEarnings(draft) => {
                    execution.upsert(draft.into_earnings(now));
                }

                MarketEffect::ReduceEarnings {
                    payment_id,
                    provider_share,
                } => {
                    let row = match execution.earnings.iter().find(|r| r.payment_id == payment_id) {
                        Some(row) => Some(row.clone()),
                        None => self
                            .store
                            .earnings_for_subject(entity.subject())
                            .await?
                            .into_iter()
                            .find(|r| r.payment_id == payment_id),
                    };
                    match row {
                        Some(mut row) => {
                            row.reduce(provider_share, now);
                            execution.upsert(row);
                        }
                        None => tracing::warn!(%payment_id, "No earnings row to reduce"),
                    }
                }

                MarketEffect::TransferEarnings { subject } => {
                    let mut rows = self.store.earnings_for_subject(subject).await?;
                    for touched in &execution.earnings {
                        match rows.iter_mut().find(|r| r.id == touched.id) {
                            Some(row) => *row = touched.clone(),
                            None => rows.push(touched.clone()),
                        }
                    }
                    for mut row in rows.into_iter().filter(|r| r.is_transferable()) {
                        row.release(now);
                        if self.pay_out(&mut row, env.policy.currency, now).await == PayoutResult::Paid {
                            execution.notifications.push(Notification {
                                recipient: row.provider_id,
                                kind: NotificationKind::PayoutSent,
                                subject,
                            });
                        }
                        execution.upsert(row);
                    }
                }

                MarketEffect::Notify(notification) => execution.notifications.push(notification),
            }
        }

        Ok(execution)
    }

    /// Attempt the transfer for one earnings row and record the outcome on it.
    ///
    /// Never fails: errors are kept on the row for the payout sweep.
    pub(super) async fn pay_out(
        &self,
        row: &mut ProviderEarnings,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> PayoutResult {
        let account = match self.store.load_provider_profile(row.provider_id).await {
            Ok(profile) => profile.payout_account,
            Err(e) => {
                tracing::warn!(error = %e, earnings_id = %row.id, "Failed to load provider profile for payout");
                row.mark_transfer_failed(e.to_string(), now);
                metrics::record_payout("failed");
                return PayoutResult::Failed;
            }
        };
        let Some(destination_account) = account else {
            tracing::warn!(earnings_id = %row.id, provider_id = %row.provider_id, "Provider has no payout account");
            row.mark_transfer_failed("payouts not configured", now);
            metrics::record_payout("not_configured");
            return PayoutResult::NotConfigured;
        };

        let request = TransferRequest {
            earnings_id: row.id,
            subject: row.subject,
            destination_account,
            amount: row.net,
            currency,
            idempotency_key: row.transfer_idempotency_key(),
        };
        match self.processor.transfer(request).await {
            Ok(outcome) => {
                tracing::info!(earnings_id = %row.id, transfer_ref = %outcome.transfer_ref, "Earnings paid out");
                row.mark_paid_out(outcome.transfer_ref, now);
                metrics::record_payout("paid_out");
                PayoutResult::Paid
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    earnings_id = %row.id,
                    attempts = row.attempts + 1,
                    retryable = e.is_retryable(),
                    "Transfer failed; queued for retry"
                );
                row.mark_transfer_failed(e.to_string(), now);
                metrics::record_payout("failed");
                PayoutResult::Failed
            }
        }
    }

    /// Current time on the service clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
