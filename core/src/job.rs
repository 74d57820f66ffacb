//! Open-marketplace jobs and provider quotes.
//!
//! A customer posts a job, providers quote on it, and the customer accepts
//! one quote which then binds the price. The job may be paid in one go or as
//! a deposit followed by the remainder; each captured phase creates its own
//! earnings row.

use crate::actor::{Actor, Role};
use crate::earnings::{EarningsDraft, Subject};
use crate::effect::{MarketEffect, Notification, NotificationKind};
use crate::environment::MarketEnvironment;
use crate::error::DomainError;
use crate::ids::{JobId, PaymentId, QuoteId, UserId};
use crate::money::Money;
use crate::payment::{charge_key, PaymentRecord, PendingCharge};
use crate::reducer::Reducer;
use crate::split::{compute_split, prorate_refund, FeePolicy, PaymentPhase, PaymentSplit, PaymentType, PlanTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::str::FromStr;

/// Job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepting quotes
    Open,
    /// A quote was accepted
    Assigned,
    /// Deposit captured
    DepositPaid,
    /// Fully paid
    Paid,
    /// Provider says the work is done
    CompletedByProvider,
    /// Customer (or system) confirmed
    Completed,
    /// Canceled
    Canceled,
}

impl JobStatus {
    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::DepositPaid => "deposit_paid",
            Self::Paid => "paid",
            Self::CompletedByProvider => "completed_by_provider",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    /// The allowed transition graph
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use JobStatus::{Assigned, Canceled, Completed, CompletedByProvider, DepositPaid, Open, Paid};
        matches!(
            (self, next),
            (Open, Assigned | Canceled)
                | (Assigned, DepositPaid | Paid | Canceled)
                | (DepositPaid, Paid | Canceled)
                | (Paid, CompletedByProvider | Canceled)
                | (CompletedByProvider, Completed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "open" => Self::Open,
            "assigned" => Self::Assigned,
            "deposit_paid" => Self::DepositPaid,
            "paid" => Self::Paid,
            "completed_by_provider" => Self::CompletedByProvider,
            "completed" => Self::Completed,
            "canceled" => Self::Canceled,
            other => return Err(format!("unknown job status: {other}")),
        })
    }
}

/// Quote status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    /// Awaiting the customer
    Submitted,
    /// The binding quote
    Accepted,
    /// Another quote was accepted or the job closed
    Rejected,
    /// Withdrawn by the provider
    Withdrawn,
}

impl QuoteStatus {
    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "submitted" => Self::Submitted,
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "withdrawn" => Self::Withdrawn,
            other => return Err(format!("unknown quote status: {other}")),
        })
    }
}

/// A provider's price for a job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQuote {
    /// Quote ID
    pub id: QuoteId,
    /// Job quoted on
    pub job_id: JobId,
    /// Quoting provider
    pub provider_id: UserId,
    /// Full price
    pub amount: Money,
    /// Optional up-front deposit, part of `amount`
    pub deposit: Option<Money>,
    /// Message to the customer
    pub message: Option<String>,
    /// Quote status
    pub status: QuoteStatus,
    /// Submitted
    pub created_at: DateTime<Utc>,
    /// Last modified
    pub updated_at: DateTime<Utc>,
}

/// A customer's open job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job ID
    pub id: JobId,
    /// Posting customer
    pub customer_id: UserId,
    /// Short title
    pub title: String,
    /// Details
    pub description: String,
    /// Job status
    pub status: JobStatus,
    /// All quotes received
    pub quotes: Vec<JobQuote>,
    /// Captured payments, in capture order
    pub payments: Vec<PaymentRecord>,
    /// Charge awaiting customer action; at most one phase at a time
    #[serde(default)]
    pub pending_charge: Option<PendingCharge>,
    /// Charge attempts refused or superseded so far
    #[serde(default)]
    pub charge_attempts: u32,
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

/// Input for posting a job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    /// Posting customer
    pub customer_id: UserId,
    /// Short title
    pub title: String,
    /// Details
    pub description: String,
}

impl JobRequest {
    /// Create an `open` job
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when the title is blank.
    pub fn post(posting: JobPosting, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if posting.title.trim().is_empty() {
            return Err(DomainError::validation("title_required", "a job needs a title"));
        }
        Ok(Self {
            id: JobId::new(),
            customer_id: posting.customer_id,
            title: posting.title,
            description: posting.description,
            status: JobStatus::Open,
            quotes: Vec::new(),
            payments: Vec::new(),
            pending_charge: None,
            charge_attempts: 0,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Subject for payments and earnings
    #[must_use]
    pub const fn subject(&self) -> Subject {
        Subject::Job(self.id)
    }

    /// The accepted quote, if any
    #[must_use]
    pub fn accepted_quote(&self) -> Option<&JobQuote> {
        self.quotes.iter().find(|q| q.status == QuoteStatus::Accepted)
    }

    /// Provider of the accepted quote
    #[must_use]
    pub fn assigned_provider(&self) -> Option<UserId> {
        self.accepted_quote().map(|q| q.provider_id)
    }

    /// Platform fee collected across all captured phases
    #[must_use]
    pub fn fee_collected(&self) -> Money {
        self.payments
            .iter()
            .fold(Money::ZERO, |total, p| total.saturating_add(p.split.platform_fee))
    }

    /// Total captured across all phases
    #[must_use]
    pub fn amount_paid(&self) -> Money {
        self.payments
            .iter()
            .fold(Money::ZERO, |total, p| total.saturating_add(p.split.total_charge))
    }

    /// Processor idempotency key for the current attempt at a phase's charge
    #[must_use]
    pub fn charge_idempotency_key(&self, phase: PaymentPhase, amount: Money, payment_method: Option<&str>) -> String {
        charge_key(
            &format!("job-{}-{phase}", self.id),
            self.charge_attempts,
            amount,
            payment_method,
        )
    }

    fn is_customer(&self, actor: &Actor) -> bool {
        actor.role == Role::Customer && actor.user_id == self.customer_id
    }

    fn is_assigned_provider(&self, actor: &Actor) -> bool {
        actor.role == Role::Provider && self.assigned_provider() == Some(actor.user_id)
    }

    fn require_customer(&self, actor: &Actor, operation: &str) -> Result<(), DomainError> {
        if self.is_customer(actor) {
            Ok(())
        } else {
            Err(DomainError::forbidden(format!("only the job's customer may {operation}")))
        }
    }

    fn require_transition(&self, next: JobStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::transition("job", self.status, next))
        }
    }

    fn quote_index(&self, quote_id: QuoteId) -> Result<usize, DomainError> {
        self.quotes
            .iter()
            .position(|q| q.id == quote_id)
            .ok_or_else(|| DomainError::validation("unknown_quote", format!("quote {quote_id} is not on this job")))
    }

    fn notify(&self, recipient: UserId, kind: NotificationKind) -> MarketEffect {
        Notification::effect(recipient, kind, self.subject())
    }

    fn void(&self, pending: &PendingCharge) -> MarketEffect {
        MarketEffect::VoidCharge {
            subject: self.subject(),
            charge_ref: pending.charge_ref.clone(),
            idempotency_key: format!("job-{}-void-{}", self.id, pending.charge_ref),
        }
    }
}

/// Actions on a job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobAction {
    /// Provider quotes
    SubmitQuote {
        /// Caller
        actor: Actor,
        /// New quote ID
        quote_id: QuoteId,
        /// Full price
        amount: Money,
        /// Optional deposit
        deposit: Option<Money>,
        /// Message to the customer
        message: Option<String>,
    },
    /// Provider withdraws a submitted quote
    WithdrawQuote {
        /// Caller
        actor: Actor,
        /// Quote to withdraw
        quote_id: QuoteId,
    },
    /// Customer accepts a quote
    AcceptQuote {
        /// Caller
        actor: Actor,
        /// Quote to accept
        quote_id: QuoteId,
    },
    /// Customer pays a phase
    RequestPayment {
        /// Caller
        actor: Actor,
        /// Phase to pay
        phase: PaymentPhase,
        /// Assigned provider's plan tier
        plan_tier: PlanTier,
        /// Saved payment method to charge, if any
        payment_method: Option<String>,
    },
    /// The processor created a phase's charge but awaits customer action
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
        /// Phase captured
        phase: PaymentPhase,
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
    /// Customer or system confirms
    ConfirmCompletion {
        /// Caller
        actor: Actor,
    },
    /// Cancel the job
    Cancel {
        /// Caller
        actor: Actor,
        /// Free-text reason
        reason: String,
    },
}

impl JobAction {
    /// Short operation name used in logs, metrics and audit entries
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SubmitQuote { .. } => "submit_quote",
            Self::WithdrawQuote { .. } => "withdraw_quote",
            Self::AcceptQuote { .. } => "accept_quote",
            Self::RequestPayment { .. } => "request_payment",
            Self::ChargePending { .. } => "charge_pending",
            Self::ChargeFailed => "charge_failed",
            Self::PaymentCaptured { .. } => "payment_captured",
            Self::MarkCompleted { .. } => "mark_completed",
            Self::ConfirmCompletion { .. } => "confirm_completion",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// The job and quote state machine
#[derive(Clone, Copy, Debug, Default)]
pub struct JobReducer;

type Effects = SmallVec<[MarketEffect; 4]>;

impl Reducer for JobReducer {
    type State = JobRequest;
    type Action = JobAction;
    type Environment = MarketEnvironment;
    type Effect = MarketEffect;
    type Error = DomainError;

    fn reduce(
        &self,
        job: &mut JobRequest,
        action: JobAction,
        env: &MarketEnvironment,
    ) -> Result<Effects, DomainError> {
        let now = env.clock.now();
        match action {
            JobAction::SubmitQuote {
                actor,
                quote_id,
                amount,
                deposit,
                message,
            } => {
                if actor.role != Role::Provider {
                    return Err(DomainError::forbidden("only providers may quote"));
                }
                if actor.user_id == job.customer_id {
                    return Err(DomainError::forbidden("cannot quote on your own job"));
                }
                if job.status != JobStatus::Open {
                    return Err(DomainError::transition("job", job.status, "quote"));
                }
                if job.quotes.iter().any(|q| q.provider_id == actor.user_id) {
                    return Err(DomainError::Conflict("provider has already quoted on this job".to_string()));
                }
                validate_quote(amount, deposit, &env.policy)?;
                job.quotes.push(JobQuote {
                    id: quote_id,
                    job_id: job.id,
                    provider_id: actor.user_id,
                    amount,
                    deposit,
                    message,
                    status: QuoteStatus::Submitted,
                    created_at: now,
                    updated_at: now,
                });
                job.updated_at = now;
                Ok(smallvec![job.notify(job.customer_id, NotificationKind::QuoteSubmitted)])
            }

            JobAction::WithdrawQuote { actor, quote_id } => {
                let index = job.quote_index(quote_id)?;
                let quote = &job.quotes[index];
                if actor.role != Role::Provider || quote.provider_id != actor.user_id {
                    return Err(DomainError::forbidden("only the quoting provider may withdraw"));
                }
                if quote.status != QuoteStatus::Submitted {
                    return Err(DomainError::transition("quote", quote.status, QuoteStatus::Withdrawn));
                }
                let quote = &mut job.quotes[index];
                quote.status = QuoteStatus::Withdrawn;
                quote.updated_at = now;
                job.updated_at = now;
                Ok(SmallVec::new())
            }

            JobAction::AcceptQuote { actor, quote_id } => {
                job.require_customer(&actor, "accept a quote")?;
                let index = job.quote_index(quote_id)?;
                job.require_transition(JobStatus::Assigned)?;
                let quote = &job.quotes[index];
                if quote.status != QuoteStatus::Submitted {
                    return Err(DomainError::transition("quote", quote.status, QuoteStatus::Accepted));
                }

                let mut accepted = None;
                let mut rejected = Vec::new();
                for (i, quote) in job.quotes.iter_mut().enumerate() {
                    if i == index {
                        quote.status = QuoteStatus::Accepted;
                        accepted = Some(quote.provider_id);
                    } else if quote.status == QuoteStatus::Submitted {
                        quote.status = QuoteStatus::Rejected;
                        rejected.push(quote.provider_id);
                    } else {
                        continue;
                    }
                    quote.updated_at = now;
                }
                let mut effects: Effects = accepted
                    .into_iter()
                    .map(|provider| job.notify(provider, NotificationKind::QuoteAccepted))
                    .collect();
                effects.extend(
                    rejected
                        .into_iter()
                        .map(|provider| job.notify(provider, NotificationKind::QuoteRejected)),
                );
                job.status = JobStatus::Assigned;
                job.updated_at = now;
                Ok(effects)
            }

            JobAction::RequestPayment {
                actor,
                phase,
                plan_tier,
                payment_method,
            } => {
                job.require_customer(&actor, "pay")?;
                let (amount, payment_type) = phase_charge(job, phase)?;
                if let Some(pending) = job.pending_charge.as_ref().filter(|p| p.phase != phase) {
                    return Err(DomainError::Conflict(format!(
                        "a {} charge is awaiting confirmation",
                        pending.phase
                    )));
                }
                check_minimum(amount, &env.policy)?;
                let cents = amount
                    .to_i64()
                    .ok_or_else(|| DomainError::validation("amount_too_large", "amount out of range"))?;
                let prior = (phase == PaymentPhase::Remainder).then(|| job.fee_collected());
                let split = compute_split(&env.policy, cents, plan_tier, payment_type, prior)?;

                let mut effects: Effects = SmallVec::new();
                let key = job.charge_idempotency_key(phase, amount, payment_method.as_deref());
                if let Some(stale) = job.pending_charge.take_if(|pending| pending.idempotency_key != key) {
                    effects.push(job.void(&stale));
                    job.charge_attempts = job.charge_attempts.saturating_add(1);
                    job.updated_at = now;
                }
                effects.push(MarketEffect::Charge {
                    subject: job.subject(),
                    phase,
                    split,
                    idempotency_key: job.charge_idempotency_key(phase, amount, payment_method.as_deref()),
                    payment_method,
                });
                Ok(effects)
            }

            JobAction::ChargePending { pending } => {
                let known = job
                    .pending_charge
                    .as_ref()
                    .is_some_and(|held| held.charge_ref == pending.charge_ref);
                if known || job.payments.iter().any(|p| p.charge_ref == pending.charge_ref) {
                    return Ok(SmallVec::new());
                }
                phase_charge(job, pending.phase)?;
                job.pending_charge = Some(pending);
                job.updated_at = now;
                Ok(SmallVec::new())
            }

            JobAction::ChargeFailed => {
                job.charge_attempts = job.charge_attempts.saturating_add(1);
                job.updated_at = now;
                Ok(SmallVec::new())
            }

            JobAction::PaymentCaptured {
                payment_id,
                phase,
                charge_ref,
                split,
            } => {
                if job.payments.iter().any(|p| p.charge_ref == charge_ref) {
                    return Ok(SmallVec::new());
                }
                if job.status == JobStatus::Canceled {
                    return refund_late_capture(job, payment_id, phase, charge_ref, split, now);
                }
                let next = match phase {
                    PaymentPhase::Deposit => JobStatus::DepositPaid,
                    PaymentPhase::Full | PaymentPhase::Remainder => JobStatus::Paid,
                };
                let expected = match phase {
                    PaymentPhase::Deposit | PaymentPhase::Full => JobStatus::Assigned,
                    PaymentPhase::Remainder => JobStatus::DepositPaid,
                };
                if job.status != expected {
                    return Err(DomainError::transition("job", job.status, next));
                }
                if !split.is_balanced() {
                    return Err(DomainError::validation("unbalanced_split", "split does not sum to the charge"));
                }
                let provider_id = job.assigned_provider().ok_or_else(|| {
                    DomainError::Conflict(format!("job {} has no accepted quote", job.id))
                })?;

                let draft = EarningsDraft::from_split(payment_id, provider_id, job.subject(), &split, &env.policy);
                job.payments.push(PaymentRecord {
                    id: payment_id,
                    subject: job.subject(),
                    phase,
                    charge_ref,
                    split,
                    refunded: Money::ZERO,
                    refunded_fee: Money::ZERO,
                    captured_at: now,
                });
                if job.pending_charge.as_ref().is_some_and(|p| p.phase == phase) {
                    job.pending_charge = None;
                }
                job.status = next;
                job.updated_at = now;
                Ok(smallvec![
                    MarketEffect::CreateEarnings(draft),
                    job.notify(job.customer_id, NotificationKind::PaymentReceived),
                    job.notify(provider_id, NotificationKind::PaymentReceived),
                ])
            }

            JobAction::MarkCompleted { actor } => {
                if !job.is_assigned_provider(&actor) {
                    return Err(DomainError::forbidden("only the assigned provider may mark the job completed"));
                }
                job.require_transition(JobStatus::CompletedByProvider)?;
                job.status = JobStatus::CompletedByProvider;
                job.updated_at = now;
                Ok(smallvec![job.notify(job.customer_id, NotificationKind::WorkCompleted)])
            }

            JobAction::ConfirmCompletion { actor } => {
                if !actor.is_system() {
                    job.require_customer(&actor, "confirm completion")?;
                }
                if job.status == JobStatus::Completed {
                    return Ok(SmallVec::new());
                }
                job.require_transition(JobStatus::Completed)?;
                job.status = JobStatus::Completed;
                job.updated_at = now;
                let mut effects: Effects = smallvec![MarketEffect::TransferEarnings {
                    subject: job.subject()
                }];
                if let Some(provider_id) = job.assigned_provider() {
                    effects.push(job.notify(provider_id, NotificationKind::CompletionConfirmed));
                }
                Ok(effects)
            }

            JobAction::Cancel { actor, reason } => {
                if !(job.is_customer(&actor) || job.is_assigned_provider(&actor) || actor.is_admin()) {
                    return Err(DomainError::forbidden("only the job's parties or an admin may cancel"));
                }
                job.require_transition(JobStatus::Canceled)?;

                let mut refunds = Vec::with_capacity(job.payments.len());
                for (index, payment) in job.payments.iter().enumerate() {
                    let refundable = payment.refundable();
                    if !refundable.is_zero() {
                        refunds.push((index, prorate_refund(refundable, &payment.refund_basis())?));
                    }
                }

                let mut effects: Effects = SmallVec::new();
                for (index, split) in refunds {
                    let idempotency_key = format!(
                        "job-{}-refund-{}-{}",
                        job.id, job.payments[index].id, job.payments[index].refunded.cents()
                    );
                    let payment = &mut job.payments[index];
                    payment.apply_refund(&split);
                    effects.push(MarketEffect::Refund {
                        payment_id: payment.id,
                        charge_ref: payment.charge_ref.clone(),
                        split,
                        reason: reason.clone(),
                        idempotency_key,
                    });
                    effects.push(MarketEffect::ReduceEarnings {
                        payment_id: payment.id,
                        provider_share: split.provider_amount,
                    });
                }
                if let Some(pending) = job.pending_charge.take() {
                    effects.push(job.void(&pending));
                }
                for quote in job.quotes.iter_mut().filter(|q| q.status == QuoteStatus::Submitted) {
                    quote.status = QuoteStatus::Rejected;
                    quote.updated_at = now;
                }
                job.status = JobStatus::Canceled;
                job.cancellation_reason = Some(reason);
                job.updated_at = now;

                effects.push(job.notify(job.customer_id, NotificationKind::Canceled));
                if let Some(provider_id) = job.assigned_provider() {
                    effects.push(job.notify(provider_id, NotificationKind::Canceled));
                }
                Ok(effects)
            }
        }
    }
}

/// Record a charge captured after the job was canceled and refund all of it
fn refund_late_capture(
    job: &mut JobRequest,
    payment_id: PaymentId,
    phase: PaymentPhase,
    charge_ref: String,
    split: PaymentSplit,
    now: DateTime<Utc>,
) -> Result<Effects, DomainError> {
    if job.payments.iter().any(|p| p.phase == phase) {
        return Err(DomainError::Conflict(format!(
            "job {} already has a {phase} payment",
            job.id
        )));
    }
    if !split.is_balanced() {
        return Err(DomainError::validation("unbalanced_split", "split does not sum to the charge"));
    }
    let mut payment = PaymentRecord {
        id: payment_id,
        subject: job.subject(),
        phase,
        charge_ref,
        split,
        refunded: Money::ZERO,
        refunded_fee: Money::ZERO,
        captured_at: now,
    };
    let refund = prorate_refund(payment.refundable(), &payment.refund_basis())?;
    payment.apply_refund(&refund);
    let effect = MarketEffect::Refund {
        payment_id,
        charge_ref: payment.charge_ref.clone(),
        split: refund,
        reason: "job canceled before the payment completed".to_string(),
        idempotency_key: format!("job-{}-late-capture-{}", job.id, payment.charge_ref),
    };
    job.payments.push(payment);
    job.pending_charge = None;
    job.updated_at = now;
    Ok(smallvec![effect])
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

fn validate_quote(amount: Money, deposit: Option<Money>, policy: &FeePolicy) -> Result<(), DomainError> {
    check_minimum(amount, policy)?;
    if let Some(deposit) = deposit {
        if deposit >= amount {
            return Err(DomainError::validation("deposit_not_below_amount", "deposit must be less than the quoted amount"));
        }
        check_minimum(deposit, policy)?;
        check_minimum(amount.saturating_sub(deposit), policy)?;
    }
    Ok(())
}

/// Amount and calculator payment type for the requested phase
fn phase_charge(job: &JobRequest, phase: PaymentPhase) -> Result<(Money, PaymentType), DomainError> {
    let quote = job
        .accepted_quote()
        .ok_or_else(|| DomainError::transition("job", job.status, "pay"))?;
    match phase {
        PaymentPhase::Full if job.status == JobStatus::Assigned => Ok((quote.amount, PaymentType::Full)),
        PaymentPhase::Deposit if job.status == JobStatus::Assigned => {
            let deposit = quote
                .deposit
                .ok_or_else(|| DomainError::validation("no_deposit", "the accepted quote has no deposit"))?;
            Ok((deposit, PaymentType::Deposit))
        }
        PaymentPhase::Remainder if job.status == JobStatus::DepositPaid => Ok((
            quote.amount.saturating_sub(job.amount_paid()),
            PaymentType::Remainder {
                job_total: quote.amount,
            },
        )),
        _ => Err(DomainError::transition("job", job.status, format!("pay {phase}"))),
    }
}
