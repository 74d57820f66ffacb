//! Provider endpoints.
//!
//! - PATCH /api/provider/bookings/update-status - Accept, quote or complete
//! - GET /api/provider/earnings - The caller's earnings, newest first

#![allow(clippy::missing_errors_doc)]

use super::idempotency::idempotent;
use crate::app::ProviderUpdate;
use crate::server::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use marketplace_core::actor::Actor;
use marketplace_core::earnings::ProviderEarnings;
use marketplace_web::{ApiJson, AppError, IdempotencyKey};

/// Apply a provider status update.
///
/// ```json
/// { "action": "quote", "booking_id": "…", "price_cents": 12000 }
/// ```
pub async fn update_status(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    ApiJson(update): ApiJson<ProviderUpdate>,
) -> Result<Response, AppError> {
    idempotent(
        state.cache.as_ref(),
        &actor,
        key,
        StatusCode::OK,
        state.marketplace.provider_update(actor, update),
    )
    .await
}

/// List the caller's earnings.
pub async fn earnings(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<ProviderEarnings>>, AppError> {
    Ok(Json(state.marketplace.provider_earnings(actor).await?))
}
