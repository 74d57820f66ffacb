//! Business metrics for the marketplace.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `marketplace_transitions_total{entity, from, to}` - Committed status changes
//! - `marketplace_charges_total{status}` - Charges by outcome (succeeded, pending, failed, voided)
//! - `marketplace_charge_volume_cents_total` - Captured charge volume in cents
//! - `marketplace_platform_fees_cents_total` - Platform fees captured in cents
//! - `marketplace_refunds_total{status}` - Refunds by outcome
//! - `marketplace_refund_volume_cents_total` - Refunded volume in cents
//! - `marketplace_payouts_total{status}` - Provider transfers by outcome
//! - `marketplace_webhooks_total{event_type, outcome}` - Processor webhooks
//! - `marketplace_side_effect_failures_total{kind}` - Failed best-effort writes
//!
//! ## Histograms
//! - `marketplace_processor_call_duration_seconds{call}` - Processor latency

use metrics::{describe_counter, describe_histogram};

/// Initialize and register all business metrics descriptions.
///
/// Call once at startup, after the exporter is installed.
pub fn register_business_metrics() {
    describe_counter!(
        "marketplace_transitions_total",
        "Committed booking and job status changes by entity, from and to status"
    );

    describe_counter!(
        "marketplace_charges_total",
        "Customer charges by outcome (succeeded, pending, failed, voided)"
    );
    describe_counter!(
        "marketplace_charge_volume_cents_total",
        "Captured charge volume in minor units"
    );
    describe_counter!(
        "marketplace_platform_fees_cents_total",
        "Platform fees within captured charges in minor units"
    );
    describe_counter!(
        "marketplace_refunds_total",
        "Refunds by outcome (succeeded, failed)"
    );
    describe_counter!(
        "marketplace_refund_volume_cents_total",
        "Refunded volume in minor units"
    );
    describe_counter!(
        "marketplace_payouts_total",
        "Provider transfers by outcome (paid_out, failed, not_configured)"
    );
    describe_histogram!(
        "marketplace_processor_call_duration_seconds",
        "Payment processor call latency"
    );

    describe_counter!(
        "marketplace_webhooks_total",
        "Processor webhooks by event type and outcome (handled, duplicate, ignored, rejected)"
    );
    describe_counter!(
        "marketplace_side_effect_failures_total",
        "Failed best-effort notifications and audit writes"
    );

    tracing::info!("Business metrics registered");
}

/// Record a committed status change.
pub fn record_transition(entity: &'static str, from: &'static str, to: &'static str) {
    metrics::counter!(
        "marketplace_transitions_total",
        "entity" => entity,
        "from" => from,
        "to" => to
    )
    .increment(1);
    tracing::debug!(entity, from, to, "Recorded transition metric");
}

/// Record a captured charge.
///
/// # Arguments
///
/// * `amount_cents` - Charged amount
/// * `fee_cents` - Platform fee within the charge
pub fn record_charge_captured(amount_cents: u64, fee_cents: u64) {
    metrics::counter!("marketplace_charges_total", "status" => "succeeded").increment(1);
    metrics::counter!("marketplace_charge_volume_cents_total").increment(amount_cents);
    metrics::counter!("marketplace_platform_fees_cents_total").increment(fee_cents);
}

/// Record a charge awaiting customer action.
pub fn record_charge_pending() {
    metrics::counter!("marketplace_charges_total", "status" => "pending").increment(1);
}

/// Record a pending charge canceled before capture.
pub fn record_charge_voided() {
    metrics::counter!("marketplace_charges_total", "status" => "voided").increment(1);
}

/// Record a failed charge.
pub fn record_charge_failed(reason: &'static str) {
    metrics::counter!("marketplace_charges_total", "status" => "failed", "reason" => reason)
        .increment(1);
}

/// Record a refund.
pub fn record_refund(amount_cents: u64, succeeded: bool) {
    if succeeded {
        metrics::counter!("marketplace_refunds_total", "status" => "succeeded").increment(1);
        metrics::counter!("marketplace_refund_volume_cents_total").increment(amount_cents);
    } else {
        metrics::counter!("marketplace_refunds_total", "status" => "failed").increment(1);
    }
}

/// Record a transfer attempt by outcome.
pub fn record_payout(status: &'static str) {
    metrics::counter!("marketplace_payouts_total", "status" => status).increment(1);
}

/// Record processor call latency.
pub fn record_processor_latency(call: &'static str, duration_secs: f64) {
    metrics::histogram!("marketplace_processor_call_duration_seconds", "call" => call)
        .record(duration_secs);
}

/// Record a webhook delivery.
pub fn record_webhook(event_type: String, outcome: &'static str) {
    metrics::counter!(
        "marketplace_webhooks_total",
        "event_type" => event_type,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a failed best-effort side effect (`notification` or `audit`).
pub fn record_side_effect_failure(kind: &'static str) {
    metrics::counter!("marketplace_side_effect_failures_total", "kind" => kind).increment(1);
}
