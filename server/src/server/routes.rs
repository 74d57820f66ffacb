//! Router configuration for the marketplace.
//!
//! Builds the complete Axum router with all endpoints.

use super::state::AppState;
use crate::api::{admin, bookings, jobs, provider, rate_limit, webhooks};
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use marketplace_web::correlation_id_layer;
use marketplace_web::handlers::{health_check, readiness};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Everything under `/api` is rate limited per client IP. Health checks are
/// not, so load balancers are never throttled.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Bookings
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/pay", post(bookings::pay_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route(
            "/bookings/:id/confirm-completion",
            post(bookings::confirm_completion),
        )
        .route("/bookings/:id/dispute", post(bookings::open_dispute))
        .route("/bookings/:id/review", post(bookings::review_booking))
        .route("/bookings/:id/reschedule", post(bookings::propose_reschedule))
        .route(
            "/bookings/:id/reschedule/respond",
            post(bookings::respond_reschedule),
        )
        // Provider
        .route(
            "/provider/bookings/update-status",
            patch(provider::update_status),
        )
        .route("/provider/earnings", get(provider::earnings))
        // Jobs and quotes
        .route("/jobs", post(jobs::post_job))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/quotes", post(jobs::submit_quote))
        .route(
            "/jobs/:id/quotes/:quote_id/withdraw",
            post(jobs::withdraw_quote),
        )
        .route("/jobs/:id/quotes/:quote_id/accept", post(jobs::accept_quote))
        .route("/jobs/:id/pay", post(jobs::pay_job))
        .route("/jobs/:id/complete", post(jobs::complete_job))
        .route(
            "/jobs/:id/confirm-completion",
            post(jobs::confirm_completion),
        )
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        // Admin
        .route(
            "/admin/disputes/:booking_id/resolve",
            post(admin::resolve_dispute),
        )
        .route("/admin/payouts/retry", post(admin::retry_payouts))
        .route(
            "/admin/fee-policy",
            get(admin::get_fee_policy).put(admin::put_fee_policy),
        )
        // Processor callbacks (signature, no session)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
