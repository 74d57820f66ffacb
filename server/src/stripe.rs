//! Stripe-compatible payment processor client.
//!
//! Charges are payment intents on the platform account; the platform fee and
//! the booking/job identity travel in `metadata` so the
//! `payment_intent.succeeded` webhook can rebuild the split. Provider payouts
//! are separate transfers grouped by subject. Every call sends the
//! effect's idempotency key as the `Idempotency-Key` header.

use crate::metrics;
use marketplace_core::ports::{
    ChargeOutcome, ChargeRequest, ChargeStatus, PaymentError, PaymentProcessor, PortFuture,
    RefundOutcome, RefundRequest, TransferOutcome, TransferRequest, VoidRequest,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

/// REST client for the hosted processor
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("base_url", &self.base_url)
            .field("secret_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Transfer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

impl StripeClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Upstream`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Upstream {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        call: &'static str,
        path: &str,
        idempotency_key: &str,
        form: &[(String, String)],
    ) -> Result<T, PaymentError> {
        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/v1/{path}", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await;
        metrics::record_processor_latency(call, started.elapsed().as_secs_f64());

        let response = response.map_err(|e| PaymentError::Upstream {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| PaymentError::Upstream {
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let error = classify_error(status.as_u16(), &body);
            tracing::warn!(call, status = status.as_u16(), error = %error, "Processor call failed");
            return Err(error);
        }
        serde_json::from_str(&body).map_err(|e| PaymentError::InvalidResponse(e.to_string()))
    }
}

fn classify_error(status: u16, body: &str) -> PaymentError {
    let detail = serde_json::from_str::<ApiErrorBody>(body).ok().map(|b| b.error);
    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| format!("HTTP {status}"));
    let code = detail.as_ref().and_then(|d| d.code.as_deref());
    let kind = detail.as_ref().and_then(|d| d.kind.as_deref());

    match (status, kind, code) {
        (_, _, Some("balance_insufficient")) => PaymentError::InsufficientBalance,
        (_, _, Some("account_invalid" | "no_account")) => PaymentError::NotConfigured(message),
        (402, _, _) | (_, Some("card_error"), _) => PaymentError::Declined(message),
        _ => PaymentError::Upstream {
            status: Some(status),
            message,
        },
    }
}

fn charge_form(request: &ChargeRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_string(), request.amount.cents().to_string()),
        ("currency".to_string(), request.currency.code().to_string()),
        ("transfer_group".to_string(), request.subject.to_string()),
        ("metadata[subject_kind]".to_string(), request.subject.kind().to_string()),
        ("metadata[subject_id]".to_string(), request.subject.uuid().to_string()),
        ("metadata[phase]".to_string(), request.phase.as_str().to_string()),
        ("metadata[platform_fee]".to_string(), request.platform_fee.cents().to_string()),
        ("metadata[customer_id]".to_string(), request.customer_id.to_string()),
        ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
    ];
    if let Some(method) = &request.payment_method {
        form.push(("payment_method".to_string(), method.clone()));
        form.push(("confirm".to_string(), "true".to_string()));
        form.push((
            "automatic_payment_methods[allow_redirects]".to_string(),
            "never".to_string(),
        ));
    }
    form
}

fn charge_status(status: &str) -> Result<ChargeStatus, PaymentError> {
    match status {
        "succeeded" => Ok(ChargeStatus::Succeeded),
        "requires_payment_method" | "requires_confirmation" | "requires_action" | "processing"
        | "requires_capture" => Ok(ChargeStatus::Pending),
        "canceled" => Err(PaymentError::Declined("payment intent was canceled".to_string())),
        other => Err(PaymentError::InvalidResponse(format!(
            "unknown payment intent status: {other}"
        ))),
    }
}

fn cancel_path(charge_ref: &str) -> String {
    format!("payment_intents/{charge_ref}/cancel")
}

impl PaymentProcessor for StripeClient {
    fn charge(&self, request: ChargeRequest) -> PortFuture<'_, ChargeOutcome, PaymentError> {
        Box::pin(async move {
            let intent: PaymentIntent = self
                .post(
                    "charge",
                    "payment_intents",
                    &request.idempotency_key,
                    &charge_form(&request),
                )
                .await?;
            let status = charge_status(&intent.status)?;
            tracing::info!(
                subject = %request.subject,
                phase = %request.phase,
                amount = request.amount.cents(),
                charge_ref = %intent.id,
                status = %intent.status,
                "Payment intent created"
            );
            Ok(ChargeOutcome {
                charge_ref: intent.id,
                status,
                client_secret: intent.client_secret,
            })
        })
    }

    fn transfer(&self, request: TransferRequest) -> PortFuture<'_, TransferOutcome, PaymentError> {
        Box::pin(async move {
            let form = vec![
                ("amount".to_string(), request.amount.cents().to_string()),
                ("currency".to_string(), request.currency.code().to_string()),
                ("destination".to_string(), request.destination_account.clone()),
                ("transfer_group".to_string(), request.subject.to_string()),
                ("metadata[earnings_id]".to_string(), request.earnings_id.to_string()),
            ];
            let transfer: Transfer = self
                .post("transfer", "transfers", &request.idempotency_key, &form)
                .await?;
            tracing::info!(
                earnings_id = %request.earnings_id,
                amount = request.amount.cents(),
                transfer_ref = %transfer.id,
                "Transfer created"
            );
            Ok(TransferOutcome {
                transfer_ref: transfer.id,
            })
        })
    }

    fn void_charge(&self, request: VoidRequest) -> PortFuture<'_, (), PaymentError> {
        Box::pin(async move {
            let form = vec![(
                "cancellation_reason".to_string(),
                "abandoned".to_string(),
            )];
            let intent: PaymentIntent = self
                .post(
                    "void",
                    &cancel_path(&request.charge_ref),
                    &request.idempotency_key,
                    &form,
                )
                .await?;
            tracing::info!(
                charge_ref = %intent.id,
                status = %intent.status,
                "Payment intent canceled"
            );
            Ok(())
        })
    }

    fn refund(&self, request: RefundRequest) -> PortFuture<'_, RefundOutcome, PaymentError> {
        Box::pin(async move {
            let form = vec![
                ("payment_intent".to_string(), request.charge_ref.clone()),
                ("amount".to_string(), request.amount.cents().to_string()),
                ("metadata[reason]".to_string(), request.reason.clone()),
            ];
            let refund: Refund = self
                .post("refund", "refunds", &request.idempotency_key, &form)
                .await?;
            tracing::info!(
                charge_ref = %request.charge_ref,
                amount = request.amount.cents(),
                refund_ref = %refund.id,
                "Refund created"
            );
            Ok(RefundOutcome {
                refund_ref: refund.id,
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use marketplace_core::earnings::Subject;
    use marketplace_core::ids::{BookingId, UserId};
    use marketplace_core::money::{Currency, Money};
    use marketplace_core::payment::charge_key;
    use marketplace_core::split::PaymentPhase;

    #[test]
    fn declines_and_balance_errors_are_classified() {
        let card = r#"{"error":{"type":"card_error","code":"card_declined","message":"Your card was declined."}}"#;
        assert_eq!(
            classify_error(402, card),
            PaymentError::Declined("Your card was declined.".to_string())
        );

        let balance = r#"{"error":{"type":"invalid_request_error","code":"balance_insufficient","message":"no funds"}}"#;
        assert_eq!(classify_error(400, balance), PaymentError::InsufficientBalance);

        let outage = classify_error(503, "upstream connect error");
        assert!(outage.is_retryable());
        assert_eq!(
            outage,
            PaymentError::Upstream {
                status: Some(503),
                message: "HTTP 503".to_string()
            }
        );
    }

    #[test]
    fn intent_statuses_map_to_charge_status() {
        assert_eq!(charge_status("succeeded").unwrap(), ChargeStatus::Succeeded);
        assert_eq!(charge_status("requires_action").unwrap(), ChargeStatus::Pending);
        assert!(matches!(charge_status("canceled"), Err(PaymentError::Declined(_))));
        assert!(matches!(charge_status("weird"), Err(PaymentError::InvalidResponse(_))));
    }

    #[test]
    fn charge_form_carries_split_metadata() {
        let booking = BookingId::new();
        let request = ChargeRequest {
            subject: Subject::Booking(booking),
            phase: PaymentPhase::Full,
            customer_id: UserId::new(),
            amount: Money::from_cents(10_000),
            platform_fee: Money::from_cents(1_000),
            currency: Currency::Nzd,
            payment_method: Some("pm_card_visa".to_string()),
            idempotency_key: charge_key(
                &format!("booking-{booking}"),
                0,
                Money::from_cents(10_000),
                Some("pm_card_visa"),
            ),
        };
        let form = charge_form(&request);
        let get = |key: &str| form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        assert_eq!(get("amount"), Some("10000"));
        assert_eq!(get("currency"), Some("nzd"));
        assert_eq!(get("metadata[platform_fee]"), Some("1000"));
        assert_eq!(get("metadata[subject_kind]"), Some("booking"));
        assert_eq!(get("metadata[subject_id]"), Some(booking.to_string().as_str()));
        assert_eq!(get("confirm"), Some("true"));
        assert!(request.idempotency_key.ends_with("-charge-0-10000-pm_card_visa"));
    }

    #[test]
    fn voids_cancel_the_payment_intent() {
        assert_eq!(cancel_path("pi_123"), "payment_intents/pi_123/cancel");

        let canceled_twice = r#"{"error":{"type":"invalid_request_error","code":"payment_intent_unexpected_state","message":"already succeeded"}}"#;
        let error = classify_error(400, canceled_twice);
        assert!(error.is_refusal());
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let client = StripeClient::new("https://api.example.test/", "sk_live_secret", Duration::from_secs(5)).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk_live_secret"));
        assert!(debug.contains("https://api.example.test"));
    }
}
