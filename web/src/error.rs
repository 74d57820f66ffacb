//! Error types for web handlers.
//!
//! [`AppError`] is the single error type returned by handlers. Domain,
//! store and processor errors convert into it with `?`, and it renders as a
//! JSON body:
//!
//! ```json
//! { "code": "CONFLICT", "message": "cannot move booking from accepted to reviewed",
//!   "current": "accepted", "requested": "reviewed" }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use marketplace_core::error::{DomainError, ErrorKind};
use marketplace_core::ports::{CacheError, PaymentError, StoreError};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// Carries the HTTP status, a stable `code` for clients, an optional
/// machine-readable `reason` for validation failures, and for state
/// conflicts the current and requested status.
///
/// # Examples
///
/// ```ignore
/// async fn handler() -> Result<Json<Booking>, AppError> {
///     let booking = store.load_booking(id).await?;
///     Ok(Json(booking))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Machine-readable reason
    reason: Option<String>,
    /// Current and requested status of a conflicting transition
    transition: Option<(String, String)>,
    /// Whether the client may retry the same request later
    retryable: bool,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            reason: None,
            transition: None,
            retryable: false,
            source: None,
        }
    }

    /// Attach a source error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a machine-readable reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Client-facing error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Machine-readable reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 400 with a machine-readable reason.
    #[must_use]
    pub fn validation(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::bad_request(message).with_reason(reason)
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{resource} with id {id} not found"),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 409 naming the current and requested status.
    #[must_use]
    pub fn transition_conflict(
        message: impl Into<String>,
        current: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        let mut err = Self::conflict(message);
        err.transition = Some((current.into(), requested.into()));
        err
    }

    /// 402 for a declined payment method.
    #[must_use]
    pub fn payment_declined(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYMENT_REQUIRED, "PAYMENT_DECLINED", message)
            .with_reason("payment_declined")
    }

    /// 502 for a payment processor failure.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message);
        err.retryable = true;
        err
    }

    /// 429 when a caller exceeds its request budget.
    #[must_use]
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message);
        err.retryable = true;
        err
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message);
        err.retryable = true;
        err
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        } else {
            tracing::debug!(status = %self.status, code = self.code, message = %self.message, "Request rejected");
        }
        metrics::counter!("marketplace_http_errors_total", "code" => self.code).increment(1);

        let body = ErrorResponse {
            code: self.code,
            message: &self.message,
            reason: self.reason.as_deref(),
            current: self.transition.as_ref().map(|(current, _)| current.as_str()),
            requested: self.transition.as_ref().map(|(_, requested)| requested.as_str()),
            retryable: self.retryable,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        let message = err.to_string();
        match (&err, err.kind()) {
            (DomainError::InvalidTransition { current, requested, .. }, _) => {
                Self::transition_conflict(message, current.clone(), requested.clone())
            }
            (_, ErrorKind::Conflict) => Self::conflict(message),
            (_, ErrorKind::Forbidden) => Self::forbidden(message),
            (_, ErrorKind::Validation) => match err.reason() {
                Some(reason) => Self::validation(reason, message),
                None => Self::bad_request(message),
            },
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::not_found(entity, id),
            StoreError::Conflict {
                ref expected,
                ref actual,
                ..
            } => Self::transition_conflict(err.to_string(), actual.clone(), expected.clone()),
            StoreError::Duplicate(_) => Self::conflict(err.to_string()),
            StoreError::Database(_) | StoreError::Serialization(_) => {
                Self::internal("A storage error occurred").with_source(anyhow::Error::new(err))
            }
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Declined(_) => Self::payment_declined(err.to_string()),
            PaymentError::NotConfigured(_) => {
                Self::conflict(err.to_string()).with_reason("payouts_not_configured")
            }
            PaymentError::InsufficientBalance
            | PaymentError::Upstream { .. }
            | PaymentError::InvalidResponse(_) => Self::upstream("The payment processor request failed")
                .with_source(anyhow::Error::new(err)),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        Self::unavailable("Cache unavailable").with_source(anyhow::Error::new(err))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use marketplace_core::split::SplitError;

    async fn body_json(err: AppError) -> serde_json::Value {
        let response = err.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::not_found("booking", "123");
        assert_eq!(err.to_string(), "[NOT_FOUND] booking with id 123 not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn illegal_transition_is_409_naming_both_states() {
        let err = AppError::from(DomainError::transition("booking", "accepted", "reviewed"));
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let body = body_json(err).await;
        assert_eq!(body["code"], "CONFLICT");
        assert_eq!(body["current"], "accepted");
        assert_eq!(body["requested"], "reviewed");
    }

    #[test]
    fn split_errors_are_400_with_reason() {
        let err = AppError::from(DomainError::from(SplitError::NonPositiveAmount { amount: -5 }));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.reason(), Some("non_positive_amount"));
    }

    #[test]
    fn forbidden_maps_to_403() {
        let err = AppError::from(DomainError::forbidden("not the provider"));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn processor_failures_are_retryable_502() {
        let err = AppError::from(PaymentError::Upstream {
            status: Some(503),
            message: "down".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

        let body = body_json(err).await;
        assert_eq!(body["code"], "UPSTREAM_ERROR");
        assert_eq!(body["retryable"], true);
    }

    #[test]
    fn store_not_found_is_404() {
        let err = AppError::from(StoreError::not_found("job", "j1"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn database_errors_hide_details() {
        let err = AppError::from(StoreError::Database("password=secret".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("secret"));
    }
}
