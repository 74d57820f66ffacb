//! HTTP API tests against the full router with in-memory ports.
//!
//! Run with: `cargo test -p marketplace-server --test http_api`

#![allow(clippy::expect_used, clippy::unwrap_used)]

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use marketplace_core::actor::Actor;
use marketplace_core::booking::{Booking, BookingStatus};
use marketplace_core::ids::UserId;
use marketplace_core::ports::MarketplaceStore;
use marketplace_core::split::FeePolicy;
use marketplace_server::api::idempotency::REPLAYED_HEADER;
use marketplace_server::auth::TokenVerifier;
use marketplace_server::config::RateLimitConfig;
use marketplace_server::webhook::{WebhookVerifier, SIGNATURE_HEADER};
use marketplace_server::{build_router, AppState, MarketplaceService};
use marketplace_testing::fixtures::{requested_booking, weekday_provider};
use marketplace_testing::{test_clock, InMemoryCache, InMemoryStore, MockPaymentProcessor, RecordingNotifier};
use marketplace_web::IDEMPOTENCY_KEY_HEADER;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const JWT_SECRET: &str = "test-jwt-secret";
const WEBHOOK_SECRET: &str = "whsec_test";

struct Api {
    server: TestServer,
    store: InMemoryStore,
    processor: MockPaymentProcessor,
    tokens: TokenVerifier,
}

fn api_with_limit(max_requests: u64) -> Api {
    let store = InMemoryStore::new();
    let processor = MockPaymentProcessor::new();
    let service = MarketplaceService::new(
        Arc::new(store.clone()),
        Arc::new(processor.clone()),
        Arc::new(RecordingNotifier::new()),
        Arc::new(test_clock()),
        FeePolicy::default(),
    );
    let tokens = TokenVerifier::new(JWT_SECRET, None, "session");
    let state = AppState::new(
        service,
        Arc::new(InMemoryCache::new()),
        tokens.clone(),
        WebhookVerifier::new(WEBHOOK_SECRET, Duration::from_secs(300)),
        RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
        },
        50,
    );
    let server = TestServer::new(build_router(state)).unwrap();
    Api {
        server,
        store,
        processor,
        tokens,
    }
}

fn api() -> Api {
    api_with_limit(1_000)
}

impl Api {
    fn bearer(&self, actor: Actor) -> HeaderValue {
        let token = self.tokens.issue(&actor, Duration::from_secs(300)).unwrap();
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
    }

    async fn booking(&self) -> Booking {
        let booking = requested_booking();
        self.store
            .save_provider_profile(weekday_provider(booking.provider_id))
            .await
            .unwrap();
        self.store.insert_booking(booking.clone()).await.unwrap();
        booking
    }
}

#[tokio::test]
async fn health_and_readiness_need_no_session() {
    let api = api();
    api.server.get("/health").await.assert_status_ok();

    let ready = api.server.get("/ready").await;
    ready.assert_status_ok();
    assert_eq!(ready.json::<Value>()["status"], "ready");
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let api = api();
    let response = api
        .server
        .post("/api/bookings")
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn forged_tokens_are_rejected() {
    let api = api();
    let forged = TokenVerifier::new("another-secret", None, "session")
        .issue(&Actor::admin(UserId::new()), Duration::from_secs(60))
        .unwrap();

    let response = api
        .server
        .get("/api/admin/fee-policy")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {forged}")).unwrap(),
        )
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_is_accepted() {
    let api = api();
    let booking = api.booking().await;
    let token = api
        .tokens
        .issue(&Actor::customer(booking.customer_id), Duration::from_secs(60))
        .unwrap();

    let response = api
        .server
        .get(&format!("/api/bookings/{}", booking.id))
        .add_header(header::COOKIE, HeaderValue::from_str(&format!("session={token}")).unwrap())
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "requested");
}

#[tokio::test]
async fn customer_creates_a_booking() {
    let api = api();
    let customer = Actor::customer(UserId::new());

    let response = api
        .server
        .post("/api/bookings")
        .add_header(header::AUTHORIZATION, api.bearer(customer))
        .json(&json!({
            "provider_id": UserId::new(),
            "service_id": marketplace_core::ids::ServiceId::new(),
            "scheduled_start": "2025-01-06T10:00:00Z",
            "duration_minutes": 60,
            "price_cents": 15_000
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "requested");
    assert_eq!(body["customer_id"], customer.user_id.to_string());
}

#[tokio::test]
async fn illegal_transition_returns_conflict_json() {
    let api = api();
    let booking = api.booking().await;
    let provider = Actor::provider(booking.provider_id);
    api.server
        .patch("/api/provider/bookings/update-status")
        .add_header(header::AUTHORIZATION, api.bearer(provider))
        .json(&json!({ "action": "accept", "booking_id": booking.id }))
        .await
        .assert_status_ok();

    let response = api
        .server
        .post(&format!("/api/bookings/{}/review", booking.id))
        .add_header(header::AUTHORIZATION, api.bearer(Actor::customer(booking.customer_id)))
        .json(&json!({ "rating": 5 }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body = response.json::<Value>();
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(body["current"], "accepted");
    assert_eq!(body["requested"], "reviewed");

    let stored = api.store.load_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Accepted);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let api = api();
    let booking = api.booking().await;

    let response = api
        .server
        .patch("/api/provider/bookings/update-status")
        .add_header(header::AUTHORIZATION, api.bearer(Actor::provider(booking.provider_id)))
        .json(&json!({ "action": "teleport", "booking_id": booking.id }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn retried_payment_with_the_same_key_charges_once() {
    let api = api();
    let booking = api.booking().await;
    api.server
        .patch("/api/provider/bookings/update-status")
        .add_header(header::AUTHORIZATION, api.bearer(Actor::provider(booking.provider_id)))
        .json(&json!({ "action": "accept", "booking_id": booking.id }))
        .await
        .assert_status_ok();

    let customer = api.bearer(Actor::customer(booking.customer_id));
    let pay = || {
        api.server
            .post(&format!("/api/bookings/{}/pay", booking.id))
            .add_header(header::AUTHORIZATION, customer.clone())
            .add_header(
                HeaderName::from_bytes(IDEMPOTENCY_KEY_HEADER.as_bytes()).unwrap(),
                HeaderValue::from_static("pay-attempt-1"),
            )
            .json(&json!({}))
    };

    let first = pay().await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>()["payment_status"], "succeeded");

    let second = pay().await;
    second.assert_status_ok();
    assert_eq!(second.header(REPLAYED_HEADER), "true");
    assert_eq!(second.json::<Value>(), first.json::<Value>());
    assert_eq!(api.processor.charges().len(), 1);
}

#[tokio::test]
async fn admin_routes_reject_other_roles() {
    let api = api();
    let response = api
        .server
        .put("/api/admin/fee-policy")
        .add_header(header::AUTHORIZATION, api.bearer(Actor::provider(UserId::new())))
        .json(&FeePolicy::default())
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let admin = api.bearer(Actor::admin(UserId::new()));
    let policy = api
        .server
        .get("/api/admin/fee-policy")
        .add_header(header::AUTHORIZATION, admin)
        .await;
    policy.assert_status_ok();
    assert_eq!(policy.json::<FeePolicy>(), FeePolicy::default());
}

#[tokio::test]
async fn webhooks_require_a_valid_signature() {
    let api = api();
    let body = json!({ "id": "evt_1", "type": "customer.created", "data": { "object": { "id": "cus_1" } } })
        .to_string();

    let unsigned = api
        .server
        .post("/api/webhooks/payments")
        .bytes(body.clone().into())
        .await;
    unsigned.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(unsigned.json::<Value>()["reason"], "invalid_signature");

    let now = test_clock_seconds();
    let signature = WebhookVerifier::new(WEBHOOK_SECRET, Duration::from_secs(300))
        .sign(body.as_bytes(), now)
        .unwrap();
    let signed = api
        .server
        .post("/api/webhooks/payments")
        .add_header(
            HeaderName::from_bytes(SIGNATURE_HEADER.as_bytes()).unwrap(),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .bytes(body.into())
        .await;
    signed.assert_status_ok();
    assert_eq!(signed.json::<Value>()["outcome"], "ignored");
}

#[tokio::test]
async fn requests_over_the_limit_are_throttled() {
    let api = api_with_limit(2);
    let actor = api.bearer(Actor::provider(UserId::new()));
    for _ in 0..2 {
        api.server
            .get("/api/provider/earnings")
            .add_header(header::AUTHORIZATION, actor.clone())
            .await
            .assert_status_ok();
    }

    let throttled = api
        .server
        .get("/api/provider/earnings")
        .add_header(header::AUTHORIZATION, actor)
        .await;
    throttled.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(throttled.json::<Value>()["code"], "RATE_LIMITED");

    // Health checks sit outside the limiter
    api.server.get("/health").await.assert_status_ok();
}

fn test_clock_seconds() -> i64 {
    use marketplace_core::environment::Clock;
    test_clock().now().timestamp()
}
