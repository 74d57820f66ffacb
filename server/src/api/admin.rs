//! Admin endpoints.
//!
//! - POST /api/admin/disputes/:booking_id/resolve - Resolve a dispute
//! - POST /api/admin/payouts/retry - Run the payout sweep now
//! - GET /api/admin/fee-policy - Current fee policy
//! - PUT /api/admin/fee-policy - Replace the fee policy

#![allow(clippy::missing_errors_doc)]

use super::idempotency::idempotent;
use crate::app::PayoutReport;
use crate::auth::RequireAdmin;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use marketplace_core::ids::BookingId;
use marketplace_core::money::Money;
use marketplace_core::split::FeePolicy;
use marketplace_web::{ApiJson, AppError, IdempotencyKey};
use serde::Deserialize;

/// Dispute resolution
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// Amount to refund the customer; zero releases the full payout
    pub refund_cents: u64,
    /// Resolution note kept on the booking
    #[serde(default)]
    pub note: String,
}

/// Resolve a disputed booking.
///
/// # Status Codes
///
/// - 200 OK
/// - 400 Bad Request: refund exceeds what remains refundable
/// - 403 Forbidden: caller is not an admin
/// - 409 Conflict: booking is not disputed
pub async fn resolve_dispute(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    key: IdempotencyKey,
    Path(booking_id): Path<BookingId>,
    ApiJson(request): ApiJson<ResolveRequest>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &admin,
        key,
        StatusCode::OK,
        state.marketplace.resolve_dispute(
            admin,
            booking_id,
            Money::from_cents(request.refund_cents),
            request.note,
        ),
    )
    .await
}

/// Retry transfers for earnings awaiting payout.
pub async fn retry_payouts(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<PayoutReport>, AppError> {
    tracing::info!(admin_id = %admin.user_id, "Manual payout sweep requested");
    Ok(Json(state.marketplace.run_payout_sweep(state.payout_batch).await?))
}

/// Read the fee policy.
pub async fn get_fee_policy(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<FeePolicy>, AppError> {
    Ok(Json(state.marketplace.fee_policy().await?))
}

/// Replace the fee policy.
pub async fn put_fee_policy(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(policy): ApiJson<FeePolicy>,
) -> Result<Json<FeePolicy>, AppError> {
    Ok(Json(state.marketplace.update_fee_policy(admin, policy).await?))
}
