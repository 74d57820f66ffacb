//! HTTP handlers for the marketplace API.
//!
//! Every handler authenticates through the [`Actor`](marketplace_core::actor::Actor)
//! extractor (the webhook endpoint verifies the processor signature
//! instead), parses its body with [`ApiJson`](marketplace_web::ApiJson) and
//! delegates to [`MarketplaceService`](crate::app::MarketplaceService).
//! Mutating handlers go through [`idempotency::idempotent`] so a retried
//! request with the same `Idempotency-Key` replays the first response.

use crate::app::ServiceError;
use marketplace_web::AppError;

pub mod admin;
pub mod bookings;
pub mod idempotency;
pub mod jobs;
pub mod provider;
pub mod rate_limit;
pub mod webhooks;

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Domain(e) => e.into(),
            ServiceError::Store(e) => e.into(),
            ServiceError::Payment(e) => e.into(),
            ServiceError::Webhook(e) => e.into(),
        }
    }
}
