//! Health check endpoints.
//!
//! `GET /health` is liveness and touches nothing. `GET /ready` pings the
//! store and returns 503 while it is unreachable.

use axum::{extract::State, http::StatusCode, Json};
use marketplace_core::ports::MarketplaceStore;
use serde::Serialize;
use std::sync::Arc;

/// Simple health check endpoint (for basic liveness).
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Readiness {
    /// `ready` or `unavailable`
    pub status: &'static str,
    /// Database check result
    pub database: String,
}

/// Readiness check against the store.
///
/// # Status Codes
///
/// - 200 OK: store reachable
/// - 503 Service Unavailable: store unreachable
pub async fn readiness(
    State(store): State<Arc<dyn MarketplaceStore>>,
) -> (StatusCode, Json<Readiness>) {
    match store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Readiness {
                status: "ready",
                database: "ok".to_string(),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "unavailable",
                    database: e.to_string(),
                }),
            )
        }
    }
}
