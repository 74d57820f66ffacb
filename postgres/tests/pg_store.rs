//! Store tests against a live PostgreSQL.
//!
//! Run with `MARKETPLACE_TEST_DATABASE_URL` pointing at a scratch database;
//! without it every test returns early.

#![allow(clippy::unwrap_used, clippy::panic)]

use marketplace_core::booking::BookingStatus;
use marketplace_core::earnings::{EarningsDraft, PayoutStatus};
use marketplace_core::environment::Clock;
use marketplace_core::ports::{BookingCommit, MarketplaceStore, StoreError};
use marketplace_core::split::FeePolicy;
use marketplace_postgres::PgMarketplaceStore;
use marketplace_testing::fixtures::{booking_in, requested_booking, weekday_provider};
use marketplace_testing::test_clock;

async fn store() -> Option<PgMarketplaceStore> {
    let url = std::env::var("MARKETPLACE_TEST_DATABASE_URL").ok()?;
    let store = PgMarketplaceStore::connect(&url).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

#[tokio::test]
async fn booking_round_trips_through_commit() {
    let Some(store) = store().await else { return };
    let booking = requested_booking();
    store.insert_booking(booking.clone()).await.unwrap();

    let mut accepted = booking.clone();
    accepted.status = BookingStatus::Accepted;
    accepted.version = 1;
    store
        .commit_booking(BookingCommit {
            booking: accepted.clone(),
            expected_status: BookingStatus::Requested,
            expected_version: 0,
            earnings: Vec::new(),
            refunds: Vec::new(),
        })
        .await
        .unwrap();

    let loaded = store.load_booking(booking.id).await.unwrap();
    assert_eq!(loaded.status, BookingStatus::Accepted);
    assert_eq!(loaded.price_at_booking, booking.price_at_booking);
    assert_eq!(loaded.version, 1);
}

#[tokio::test]
async fn stale_version_is_a_conflict_even_when_the_status_matches() {
    let Some(store) = store().await else { return };
    let booking = requested_booking();
    store.insert_booking(booking.clone()).await.unwrap();

    let mut first = booking.clone();
    first.charge_attempts = 1;
    first.version = 1;
    store
        .commit_booking(BookingCommit {
            booking: first,
            expected_status: BookingStatus::Requested,
            expected_version: 0,
            earnings: Vec::new(),
            refunds: Vec::new(),
        })
        .await
        .unwrap();

    let mut second = booking.clone();
    second.cancellation_reason = Some("changed my mind".to_string());
    second.version = 1;
    let err = store
        .commit_booking(BookingCommit {
            booking: second,
            expected_status: BookingStatus::Requested,
            expected_version: 0,
            earnings: Vec::new(),
            refunds: Vec::new(),
        })
        .await
        .unwrap_err();
    let StoreError::Conflict { expected, actual, .. } = err else {
        panic!("expected a conflict, got {err:?}");
    };
    assert_eq!((expected.as_str(), actual.as_str()), ("version 0", "version 1"));

    let loaded = store.load_booking(booking.id).await.unwrap();
    assert_eq!(loaded.charge_attempts, 1);
    assert!(loaded.cancellation_reason.is_none());
}

#[tokio::test]
async fn stale_status_is_a_conflict_and_writes_nothing() {
    let Some(store) = store().await else { return };
    let booking = requested_booking();
    store.insert_booking(booking.clone()).await.unwrap();

    let mut paid = booking_in(BookingStatus::Paid);
    paid.id = booking.id;
    paid.customer_id = booking.customer_id;
    paid.provider_id = booking.provider_id;
    paid.service_id = booking.service_id;

    let err = store
        .commit_booking(BookingCommit {
            booking: paid,
            expected_status: BookingStatus::Accepted,
            expected_version: 0,
            earnings: Vec::new(),
            refunds: Vec::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }), "{err:?}");

    let loaded = store.load_booking(booking.id).await.unwrap();
    assert_eq!(loaded.status, BookingStatus::Requested);
    assert!(loaded.payment.is_none());
}

#[tokio::test]
async fn paid_out_earnings_are_not_downgraded() {
    let Some(store) = store().await else { return };
    let requested = requested_booking();
    store.insert_booking(requested.clone()).await.unwrap();

    let mut paid = booking_in(BookingStatus::Paid);
    paid.id = requested.id;
    paid.customer_id = requested.customer_id;
    paid.provider_id = requested.provider_id;
    paid.service_id = requested.service_id;
    let mut payment = paid.payment.clone().unwrap();
    payment.subject = paid.subject();
    payment.charge_ref = format!("pi_{}", paid.id.as_uuid().simple());
    paid.payment = Some(payment.clone());

    let now = test_clock().now();
    let mut earnings = EarningsDraft::from_split(
        payment.id,
        paid.provider_id,
        paid.subject(),
        &payment.split,
        &FeePolicy::default(),
    )
    .into_earnings(now);

    store
        .commit_booking(BookingCommit {
            booking: paid,
            expected_status: BookingStatus::Requested,
            expected_version: 0,
            earnings: vec![earnings.clone()],
            refunds: Vec::new(),
        })
        .await
        .unwrap();

    earnings.mark_paid_out(format!("tr_{}", earnings.id.as_uuid().simple()), now);
    store.save_earnings(earnings.clone()).await.unwrap();

    let mut stale = earnings.clone();
    stale.status = PayoutStatus::AwaitingPayout;
    assert!(matches!(
        store.save_earnings(stale).await,
        Err(StoreError::Conflict { .. })
    ));
    assert_eq!(
        store.load_earnings(earnings.id).await.unwrap().status,
        PayoutStatus::PaidOut
    );
}

#[tokio::test]
async fn webhook_events_deduplicate() {
    let Some(store) = store().await else { return };
    let event_id = format!("evt_{}", uuid::Uuid::new_v4().simple());
    assert!(store.record_webhook_event(event_id.clone(), "transfer.paid".into()).await.unwrap());
    assert!(!store.record_webhook_event(event_id, "transfer.paid".into()).await.unwrap());
}

#[tokio::test]
async fn provider_profile_and_fee_policy_persist() {
    let Some(store) = store().await else { return };
    let provider = marketplace_core::ids::UserId::new();
    let profile = weekday_provider(provider);
    store.save_provider_profile(profile.clone()).await.unwrap();
    assert_eq!(store.load_provider_profile(provider).await.unwrap(), profile);

    let policy = FeePolicy {
        starter_fee_bps: 1_200,
        ..FeePolicy::default()
    };
    store.save_fee_policy(policy).await.unwrap();
    assert_eq!(store.load_fee_policy().await.unwrap(), Some(policy));
}
