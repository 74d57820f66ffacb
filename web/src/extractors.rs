//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation ID (header or generated)
//! - `ClientIp`: client IP from proxy headers, used to key rate limits
//! - `IdempotencyKey`: optional `Idempotency-Key` header on mutating calls
//! - `ApiJson`: JSON body whose rejections render as [`AppError`]
//!
//! # Examples
//!
//! ```ignore
//! async fn pay(
//!     actor: Actor,
//!     key: IdempotencyKey,
//!     ApiJson(body): ApiJson<PayRequest>,
//! ) -> Result<Json<PayResponse>, AppError> {
//!     // ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
};
use serde::de::DeserializeOwned;
use std::net::{IpAddr, Ipv4Addr};
use uuid::Uuid;

/// Header carrying a client-chosen idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Longest accepted idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Correlation ID for request tracing.
///
/// Uses the ID stored by the correlation middleware when it is installed,
/// otherwise the `X-Correlation-ID` header, otherwise a new UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }
        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Client IP address.
///
/// # Priority
///
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. Loopback
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(extract_client_ip(&parts.headers)))
    }
}

fn extract_client_ip(headers: &HeaderMap) -> IpAddr {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    let real = || {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };
    forwarded
        .or_else(real)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Optional `Idempotency-Key` header.
///
/// Rejects empty or oversized keys with 400.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };
        let key = value
            .to_str()
            .map_err(|_| AppError::validation("invalid_idempotency_key", "Idempotency-Key must be ASCII"))?
            .trim();
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::validation(
                "invalid_idempotency_key",
                format!("Idempotency-Key must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"),
            ));
        }
        Ok(Self(Some(key.to_string())))
    }
}

/// JSON body extractor that rejects with a 400 [`AppError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(&rejection)),
        }
    }
}

fn json_rejection(rejection: &JsonRejection) -> AppError {
    let reason = match rejection {
        JsonRejection::MissingJsonContentType(_) => "unsupported_content_type",
        JsonRejection::JsonSyntaxError(_) => "malformed_json",
        _ => "invalid_body",
    };
    AppError::validation(reason, rejection.body_text())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest, StatusCode};
    use serde::Deserialize;

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let req = HttpRequest::builder()
            .header(CORRELATION_ID_HEADER, uuid.to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_generates_new() {
        let req = HttpRequest::builder().body(()).expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_ne!(correlation_id.0, Uuid::nil());
    }

    #[tokio::test]
    async fn test_client_ip_from_x_forwarded_for() {
        let req = HttpRequest::builder()
            .header("X-Forwarded-For", "203.0.113.1, 198.51.100.1")
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let client_ip = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(client_ip.0.to_string(), "203.0.113.1");
    }

    #[tokio::test]
    async fn test_client_ip_fallback() {
        let req = HttpRequest::builder()
            .header("X-Real-IP", "not an ip")
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let client_ip = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(client_ip.0.to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn idempotency_key_is_optional_but_bounded() {
        let (mut parts, ()) = HttpRequest::builder().body(()).unwrap().into_parts();
        assert_eq!(
            IdempotencyKey::from_request_parts(&mut parts, &()).await.unwrap(),
            IdempotencyKey(None)
        );

        let (mut parts, ()) = HttpRequest::builder()
            .header(IDEMPOTENCY_KEY_HEADER, "pay-1")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(
            IdempotencyKey::from_request_parts(&mut parts, &()).await.unwrap(),
            IdempotencyKey(Some("pay-1".into()))
        );

        let (mut parts, ()) = HttpRequest::builder()
            .header(IDEMPOTENCY_KEY_HEADER, "x".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1))
            .body(())
            .unwrap()
            .into_parts();
        let err = IdempotencyKey::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.reason(), Some("invalid_idempotency_key"));
    }

    #[derive(Debug, Deserialize)]
    struct Rating {
        rating: u8,
    }

    #[tokio::test]
    async fn malformed_json_is_a_400_with_reason() {
        let req = HttpRequest::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"rating\":"))
            .unwrap();
        let err = ApiJson::<Rating>::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.reason(), Some("malformed_json"));

        let req = HttpRequest::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"rating\":4}"))
            .unwrap();
        let ApiJson(body) = ApiJson::<Rating>::from_request(req, &()).await.unwrap();
        assert_eq!(body.rating, 4);
    }
}
