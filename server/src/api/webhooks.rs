//! Payment processor webhook endpoint.
//!
//! - POST /api/webhooks/payments
//!
//! No session: the delivery is authenticated by its signature header. Bad
//! signatures get 400 so the processor surfaces them; handler failures get
//! 5xx so it retries.

use crate::app::WebhookOutcome;
use crate::metrics;
use crate::server::AppState;
use crate::webhook::{WebhookError, WebhookEvent, SIGNATURE_HEADER};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use marketplace_web::AppError;
use serde::Serialize;

/// Acknowledgement body
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always true once the event is accepted
    pub received: bool,
    /// How the event was handled
    pub outcome: WebhookOutcome,
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        let reason = match err {
            WebhookError::InvalidPayload(_) => "invalid_webhook_payload",
            _ => "invalid_signature",
        };
        Self::validation(reason, err.to_string())
    }
}

/// Verify and apply a processor event.
///
/// # Errors
///
/// 400 for signature and payload problems; store and processor failures
/// map to their usual statuses.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let now = state.marketplace.now().timestamp();
    if let Err(e) = state.webhooks.verify(&body, signature, now) {
        tracing::warn!(error = %e, "Rejected webhook delivery");
        metrics::record_webhook("unverified".to_string(), "rejected");
        return Err(e.into());
    }
    let event = WebhookEvent::parse(&body)?;
    let outcome = state.marketplace.handle_webhook(event).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}
