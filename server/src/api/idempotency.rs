//! Idempotent responses for mutating endpoints.
//!
//! Clients may send an `Idempotency-Key` header on any mutating call. The
//! first response is cached for 24 hours under
//! `idempotency:{user_id}:{key}`; a retry with the same key gets the cached
//! status and body back without running the operation again.
//!
//! ```text
//! POST /api/bookings/7c9e.../pay
//! Idempotency-Key: 550e8400-e29b-41d4-a716-446655440000
//! Authorization: Bearer <token>
//! ```
//!
//! Keys are scoped by user so one user cannot replay another's response.
//! The cache is best effort: when it is unreachable the request runs
//! normally and only a warning is logged.

use crate::app::ServiceError;
use crate::metrics;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use marketplace_core::actor::Actor;
use marketplace_core::ports::Cache;
use marketplace_web::{AppError, IdempotencyKey};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How long a response is replayable
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Header set on replayed responses
pub const REPLAYED_HEADER: &str = "Idempotent-Replayed";

#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    body: serde_json::Value,
}

fn cache_key(actor: &Actor, key: &str) -> String {
    format!("idempotency:{}:{key}", actor.user_id)
}

async fn replay(cache: &dyn Cache, key: &str) -> Option<Response> {
    let cached = match cache.get(key).await {
        Ok(cached) => cached?,
        Err(e) => {
            tracing::warn!(error = %e, "Idempotency cache read failed");
            metrics::record_side_effect_failure("idempotency_cache");
            return None;
        }
    };
    let cached: CachedResponse = serde_json::from_str(&cached)
        .inspect_err(|e| tracing::warn!(error = %e, "Discarding unreadable idempotent response"))
        .ok()?;
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = (status, Json(cached.body)).into_response();
    response
        .headers_mut()
        .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    Some(response)
}

async fn remember(cache: &dyn Cache, key: &str, status: StatusCode, body: serde_json::Value) {
    let cached = CachedResponse {
        status: status.as_u16(),
        body,
    };
    let Ok(value) = serde_json::to_string(&cached) else {
        return;
    };
    if let Err(e) = cache.set(key, value, IDEMPOTENCY_TTL).await {
        tracing::warn!(error = %e, "Idempotency cache write failed");
        metrics::record_side_effect_failure("idempotency_cache");
    }
}

/// Run `operation` once per idempotency key and respond with `status` and
/// its JSON result.
///
/// Without a key the operation simply runs. Errors are never cached, so a
/// failed request can be retried with the same key.
///
/// # Errors
///
/// The operation's error, converted to [`AppError`].
pub async fn idempotent<T, F>(
    cache: &dyn Cache,
    actor: &Actor,
    IdempotencyKey(key): IdempotencyKey,
    status: StatusCode,
    operation: F,
) -> Result<Response, AppError>
where
    T: Serialize,
    F: Future<Output = Result<T, ServiceError>>,
{
    let Some(key) = key.map(|key| cache_key(actor, &key)) else {
        let result = operation.await?;
        return Ok((status, Json(result)).into_response());
    };

    if let Some(response) = replay(cache, &key).await {
        tracing::debug!(%key, "Replaying idempotent response");
        return Ok(response);
    }

    let result = operation.await?;
    let body = serde_json::to_value(&result)
        .map_err(|e| AppError::internal("Failed to encode response").with_source(e.into()))?;
    remember(cache, &key, status, body.clone()).await;
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
