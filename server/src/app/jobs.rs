//! Job and quote operations.

use super::executor::Transitioned;
use super::{MarketplaceService, ServiceError};
use marketplace_core::actor::{Actor, Role};
use marketplace_core::error::DomainError;
use marketplace_core::ids::{JobId, QuoteId};
use marketplace_core::job::{JobAction, JobPosting, JobRequest};
use marketplace_core::money::Money;
use marketplace_core::ports::ChargeStatus;
use marketplace_core::split::{PaymentPhase, PlanTier};
use serde::{Deserialize, Serialize};

/// New job from a customer
#[derive(Debug, Clone, Deserialize)]
pub struct PostJob {
    /// Short title
    pub title: String,
    /// Details
    #[serde(default)]
    pub description: String,
}

/// A provider's quote
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitQuote {
    /// Full price in cents
    pub amount_cents: u64,
    /// Optional deposit in cents
    #[serde(default)]
    pub deposit_cents: Option<u64>,
    /// Message to the customer
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of paying a job phase
#[derive(Debug, Clone, Serialize)]
pub struct JobPayOutcome {
    /// Job after the request
    pub job: JobRequest,
    /// Phase charged
    pub phase: PaymentPhase,
    /// Whether the charge was captured or awaits the customer
    pub payment_status: ChargeStatus,
    /// Secret the client uses to complete a pending charge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl MarketplaceService {
    /// Post a job.
    ///
    /// # Errors
    ///
    /// Forbidden for non-customers; validation for a blank title.
    pub async fn post_job(&self, actor: Actor, posting: PostJob) -> Result<JobRequest, ServiceError> {
        if actor.role != Role::Customer {
            return Err(DomainError::forbidden("only customers may post jobs").into());
        }
        let job = JobRequest::post(
            JobPosting {
                customer_id: actor.user_id,
                title: posting.title,
                description: posting.description,
            },
            self.now(),
        )?;
        self.store.insert_job(job.clone()).await?;
        tracing::info!(job_id = %job.id, customer_id = %job.customer_id, "Job posted");
        Ok(job)
    }

    /// Read a job with its quotes.
    ///
    /// Open jobs are visible to every provider so they can quote.
    ///
    /// # Errors
    ///
    /// Not found, or forbidden for other customers.
    pub async fn job(&self, actor: Actor, id: JobId) -> Result<JobRequest, ServiceError> {
        let job = self.store.load_job(id).await?;
        let visible = actor.is_privileged() || actor.user_id == job.customer_id || actor.role == Role::Provider;
        if !visible {
            return Err(DomainError::forbidden("not the owner of this job").into());
        }
        Ok(job)
    }

    async fn apply_job(
        &self,
        id: JobId,
        actor: Actor,
        action: JobAction,
    ) -> Result<Transitioned<JobRequest>, ServiceError> {
        let job = self.store.load_job(id).await?;
        self.transition(job, actor, action).await
    }

    /// Submit a quote on an open job.
    ///
    /// # Errors
    ///
    /// Forbidden for non-providers and the job's own customer; conflict for
    /// a second quote by the same provider or a closed job; validation for
    /// amounts below the minimum or a deposit not below the amount.
    pub async fn submit_quote(&self, actor: Actor, id: JobId, quote: SubmitQuote) -> Result<JobRequest, ServiceError> {
        let action = JobAction::SubmitQuote {
            actor,
            quote_id: QuoteId::new(),
            amount: Money::from_cents(quote.amount_cents),
            deposit: quote.deposit_cents.map(Money::from_cents),
            message: quote.message,
        };
        Ok(self.apply_job(id, actor, action).await?.entity)
    }

    /// Withdraw a submitted quote.
    ///
    /// # Errors
    ///
    /// Forbidden unless the caller quoted; conflict unless `submitted`.
    pub async fn withdraw_quote(&self, actor: Actor, id: JobId, quote_id: QuoteId) -> Result<JobRequest, ServiceError> {
        let action = JobAction::WithdrawQuote { actor, quote_id };
        Ok(self.apply_job(id, actor, action).await?.entity)
    }

    /// Accept a quote; every other submitted quote is rejected.
    ///
    /// # Errors
    ///
    /// Forbidden unless the caller owns the job; conflict unless the job is
    /// open and the quote submitted.
    pub async fn accept_quote(&self, actor: Actor, id: JobId, quote_id: QuoteId) -> Result<JobRequest, ServiceError> {
        let action = JobAction::AcceptQuote { actor, quote_id };
        Ok(self.apply_job(id, actor, action).await?.entity)
    }

    /// Charge one phase of an assigned job.
    ///
    /// # Errors
    ///
    /// Forbidden unless the caller owns the job; conflict when the phase is
    /// not payable now; processor failures.
    pub async fn pay_job(
        &self,
        actor: Actor,
        id: JobId,
        phase: PaymentPhase,
        payment_method: Option<String>,
    ) -> Result<JobPayOutcome, ServiceError> {
        let job = self.store.load_job(id).await?;
        let plan_tier = match job.assigned_provider() {
            Some(provider_id) => self.store.load_provider_profile(provider_id).await?.plan_tier,
            None => PlanTier::default(),
        };
        let action = JobAction::RequestPayment {
            actor,
            phase,
            plan_tier,
            payment_method,
        };
        let done = self.transition(job, actor, action).await?;
        let (payment_status, client_secret) = match done.charge {
            Some(charge) => (charge.status, charge.client_secret),
            None => (ChargeStatus::Succeeded, None),
        };
        Ok(JobPayOutcome {
            job: done.entity,
            phase,
            payment_status,
            client_secret,
        })
    }

    /// Assigned provider marks the job done.
    ///
    /// # Errors
    ///
    /// Forbidden unless the caller is the assigned provider; conflict unless
    /// fully paid.
    pub async fn complete_job(&self, actor: Actor, id: JobId) -> Result<JobRequest, ServiceError> {
        let action = JobAction::MarkCompleted { actor };
        Ok(self.apply_job(id, actor, action).await?.entity)
    }

    /// Customer confirms the job; every held earnings row is transferred.
    ///
    /// # Errors
    ///
    /// Forbidden unless the caller owns the job; conflict unless
    /// `completed_by_provider`.
    pub async fn confirm_job(&self, actor: Actor, id: JobId) -> Result<JobRequest, ServiceError> {
        let action = JobAction::ConfirmCompletion { actor };
        Ok(self.apply_job(id, actor, action).await?.entity)
    }

    /// Cancel a job, refunding every captured phase.
    ///
    /// # Errors
    ///
    /// Forbidden for non-parties; conflict once the work is marked done;
    /// refund failures.
    pub async fn cancel_job(&self, actor: Actor, id: JobId, reason: String) -> Result<JobRequest, ServiceError> {
        let action = JobAction::Cancel { actor, reason };
        Ok(self.apply_job(id, actor, action).await?.entity)
    }
}
