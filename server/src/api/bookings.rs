//! Booking API endpoints.
//!
//! - POST /api/bookings - Customer requests a booking
//! - GET /api/bookings/:id - Read a booking (parties and admins)
//! - POST /api/bookings/:id/pay - Customer pays an accepted booking
//! - POST /api/bookings/:id/cancel - Cancel, refunding any captured charge
//! - POST /api/bookings/:id/confirm-completion - Customer confirms the work
//! - POST /api/bookings/:id/dispute - Open a dispute
//! - POST /api/bookings/:id/review - Customer reviews
//! - POST /api/bookings/:id/reschedule - Propose a new start time
//! - POST /api/bookings/:id/reschedule/respond - Approve or decline it

#![allow(clippy::missing_errors_doc)]

use super::idempotency::idempotent;
use crate::app::CreateBooking;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use marketplace_core::actor::{Actor, Party};
use marketplace_core::booking::Booking;
use marketplace_core::ids::BookingId;
use marketplace_web::{ApiJson, AppError, IdempotencyKey};
use serde::Deserialize;

// ============================================================================
// Request Types
// ============================================================================

/// Payment request. Send `{}` to use the customer's default method.
#[derive(Debug, Default, Deserialize)]
pub struct PayRequest {
    /// Processor payment method ID
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// Cancellation request
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// Free-text reason
    #[serde(default)]
    pub reason: String,
    /// Side the cancellation is attributed to; required for admins
    #[serde(default)]
    pub side: Option<Party>,
}

/// Dispute request
#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    /// What went wrong
    pub reason: String,
}

/// Review request
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    /// 1 to 5
    pub rating: u8,
    /// Optional comment
    #[serde(default)]
    pub comment: Option<String>,
}

/// Reschedule proposal
#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    /// New start time
    pub proposed_start: DateTime<Utc>,
}

/// Answer to a reschedule proposal
#[derive(Debug, Deserialize)]
pub struct RescheduleResponse {
    /// Whether the proposal is accepted
    pub approve: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a booking request.
///
/// # Status Codes
///
/// - 201 Created
/// - 400 Bad Request: past slot, zero price, bad duration, self-booking
/// - 403 Forbidden: caller is not a customer
pub async fn create_booking(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    ApiJson(request): ApiJson<CreateBooking>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::CREATED,
        state.marketplace.create_booking(actor, request),
    )
    .await
}

/// Read a booking.
pub async fn get_booking(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.marketplace.booking(actor, id).await?))
}

/// Pay for an accepted booking.
///
/// Responds with the booking, the charge status and, while the charge
/// awaits customer action, the client secret.
///
/// # Status Codes
///
/// - 200 OK
/// - 402 Payment Required: card declined
/// - 409 Conflict: booking is not `accepted`
/// - 502 Bad Gateway: processor unavailable
pub async fn pay_booking(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<BookingId>,
    ApiJson(request): ApiJson<PayRequest>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.pay_booking(actor, id, request.payment_method),
    )
    .await
}

/// Cancel a booking.
pub async fn cancel_booking(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<BookingId>,
    ApiJson(request): ApiJson<CancelRequest>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.cancel_booking(actor, id, request.side, request.reason),
    )
    .await
}

/// Confirm completion and release the provider's earnings.
///
/// Confirming twice returns the booking unchanged.
pub async fn confirm_completion(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<BookingId>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.confirm_booking(actor, id),
    )
    .await
}

/// Open a dispute.
pub async fn open_dispute(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<BookingId>,
    ApiJson(request): ApiJson<DisputeRequest>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.dispute_booking(actor, id, request.reason),
    )
    .await
}

/// Review a completed booking.
pub async fn review_booking(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<BookingId>,
    ApiJson(request): ApiJson<ReviewRequest>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state
            .marketplace
            .review_booking(actor, id, request.rating, request.comment),
    )
    .await
}

/// Propose a new start time.
///
/// # Status Codes
///
/// - 200 OK
/// - 400 Bad Request: slot outside the schedule, in time off or taken
/// - 409 Conflict: a proposal is already pending
pub async fn propose_reschedule(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<BookingId>,
    ApiJson(request): ApiJson<RescheduleRequest>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state
            .marketplace
            .propose_reschedule(actor, id, request.proposed_start),
    )
    .await
}

/// Approve or decline a pending proposal.
pub async fn respond_reschedule(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<BookingId>,
    ApiJson(request): ApiJson<RescheduleResponse>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.respond_reschedule(actor, id, request.approve),
    )
    .await
}
