//! Fixed-window rate limiting per client IP.

use crate::metrics;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use marketplace_web::{AppError, ClientIp};

/// Counts requests per client IP in a window shared across instances
/// through the cache. When the cache is unreachable requests are let
/// through.
pub async fn rate_limit(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    let limit = state.rate_limit;
    let key = format!("rate_limit:{ip}");
    match state.cache.incr(&key, limit.window).await {
        Ok(count) if count > limit.max_requests => {
            tracing::debug!(%ip, count, "Rate limit exceeded");
            return AppError::too_many_requests(format!(
                "More than {} requests in {} seconds",
                limit.max_requests,
                limit.window.as_secs()
            ))
            .into_response();
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Rate limit counter unavailable");
            metrics::record_side_effect_failure("rate_limit");
        }
    }
    next.run(request).await
}
