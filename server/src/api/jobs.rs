//! Job and quote endpoints.
//!
//! - POST /api/jobs - Customer posts a job
//! - GET /api/jobs/:id - Read a job with its quotes
//! - POST /api/jobs/:id/quotes - Provider quotes
//! - POST /api/jobs/:id/quotes/:quote_id/withdraw - Provider withdraws
//! - POST /api/jobs/:id/quotes/:quote_id/accept - Customer accepts
//! - POST /api/jobs/:id/pay - Customer pays the deposit, remainder or full
//! - POST /api/jobs/:id/complete - Provider marks the work done
//! - POST /api/jobs/:id/confirm-completion - Customer confirms
//! - POST /api/jobs/:id/cancel - Cancel, refunding every captured phase

#![allow(clippy::missing_errors_doc)]

use super::idempotency::idempotent;
use crate::app::{PostJob, SubmitQuote};
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use marketplace_core::actor::Actor;
use marketplace_core::ids::{JobId, QuoteId};
use marketplace_core::job::JobRequest;
use marketplace_core::split::PaymentPhase;
use marketplace_web::{ApiJson, AppError, IdempotencyKey};
use serde::Deserialize;

// ============================================================================
// Request Types
// ============================================================================

/// Payment request for one phase
#[derive(Debug, Deserialize)]
pub struct PayJobRequest {
    /// `deposit`, `remainder` or `full`
    pub phase: PaymentPhase,
    /// Processor payment method ID
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// Cancellation request
#[derive(Debug, Deserialize)]
pub struct CancelJobRequest {
    /// Free-text reason
    #[serde(default)]
    pub reason: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Post a job.
pub async fn post_job(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    ApiJson(posting): ApiJson<PostJob>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::CREATED,
        state.marketplace.post_job(actor, posting),
    )
    .await
}

/// Read a job.
pub async fn get_job(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<JobId>,
) -> Result<Json<JobRequest>, AppError> {
    Ok(Json(state.marketplace.job(actor, id).await?))
}

/// Submit a quote.
///
/// # Status Codes
///
/// - 201 Created
/// - 400 Bad Request: zero amount or deposit not below the amount
/// - 409 Conflict: the provider already has an active quote
pub async fn submit_quote(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<JobId>,
    ApiJson(quote): ApiJson<SubmitQuote>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::CREATED,
        state.marketplace.submit_quote(actor, id, quote),
    )
    .await
}

/// Withdraw a pending quote.
pub async fn withdraw_quote(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path((id, quote_id)): Path<(JobId, QuoteId)>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.withdraw_quote(actor, id, quote_id),
    )
    .await
}

/// Accept a quote; the job's other quotes are rejected.
pub async fn accept_quote(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path((id, quote_id)): Path<(JobId, QuoteId)>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.accept_quote(actor, id, quote_id),
    )
    .await
}

/// Pay one phase of an assigned job.
pub async fn pay_job(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<JobId>,
    ApiJson(request): ApiJson<PayJobRequest>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state
            .marketplace
            .pay_job(actor, id, request.phase, request.payment_method),
    )
    .await
}

/// Mark the job done.
pub async fn complete_job(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<JobId>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.complete_job(actor, id),
    )
    .await
}

/// Confirm the job and release the provider's earnings.
pub async fn confirm_completion(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<JobId>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.confirm_job(actor, id),
    )
    .await
}

/// Cancel a job.
pub async fn cancel_job(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<JobId>,
    ApiJson(request): ApiJson<CancelJobRequest>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.cancel_job(actor, id, request.reason),
    )
    .await
}
